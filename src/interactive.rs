//! # Interactive mode
//!
//! A read-eval-print loop over the query engine and the image generator. Each input line is
//! parsed into a [`ReplCommand`]; anything that is not a command is treated as a question.
//!
//! | Input | Effect |
//! |-------|--------|
//! | `exit`, `quit` | leave the loop |
//! | `help` | list commands |
//! | `prompt` | replace the system prompt (asks for it on the next line) |
//! | `template <name>` | load a query template by name or path |
//! | `reload` | look for an index again |
//! | `image <prompt>` | generate an image from `prompt` |
//! | `analyze <text>` | enhance `text` into an image prompt, then generate |
//! | anything else | query the knowledge base |
//!
//! Only a bare `prompt` is a command, so questions starting with "prompt" are still asked.
//! `template`, `image` and `analyze` followed by text always take the line over.

use crate::image_generator::ImageGenerator;
use crate::pretty::{print_images, print_pretty, print_sources};
use crate::query_engine::QueryEngine;
use crate::template::load_template;
use crossterm::{
    ExecutableCommand,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::error::Error;
use std::io::{BufRead, Write, stdout};
use tracing::error;

const HELP: &str = "\
=== RAG 交互式模式 ===
输入 'exit' 或 'quit' 退出
输入 'prompt' 更新系统提示
输入 'template <名称>' 加载查询模板
输入 'reload' 重新加载索引
输入 'image <描述>' 生成图像
输入 'analyze <文本>' 分析文本并生成图像
===================================";

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Exit,
    Help,
    Prompt,
    Template(String),
    Reload,
    Image(String),
    Analyze(String),
    Query(String),
}

impl ReplCommand {
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return Self::Empty;
        }

        let (head, rest) = match input.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (input, ""),
        };

        match (head.to_lowercase().as_str(), rest.is_empty()) {
            ("exit" | "quit", true) => Self::Exit,
            ("help", true) => Self::Help,
            ("reload", true) => Self::Reload,
            ("prompt", true) => Self::Prompt,
            ("template", false) => Self::Template(rest.to_string()),
            ("image", false) => Self::Image(rest.to_string()),
            ("analyze", false) => Self::Analyze(rest.to_string()),
            _ => Self::Query(input.to_string()),
        }
    }
}

/// Print `label` in green and read one line. `None` at end of input.
fn read_line(input: &mut impl BufRead, label: &str) -> Result<Option<String>, Box<dyn Error>> {
    let mut out = stdout();
    out.execute(SetForegroundColor(Color::Green))?;
    out.execute(Print(label))?;
    out.execute(ResetColor)?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Run the loop until `exit` or end of input.
pub async fn interactive_mode(
    engine: &mut QueryEngine,
    images: &ImageGenerator,
    mut input: impl BufRead,
) -> Result<(), Box<dyn Error>> {
    println!("\n{HELP}\n");

    loop {
        let Some(line) = read_line(&mut input, "\n请输入您的问题 > ")? else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Exit => {
                println!("再见!");
                break;
            }
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Prompt => {
                let prompt = match read_line(&mut input, "请输入新的系统提示 > ")? {
                    Some(prompt) if !prompt.trim().is_empty() => prompt,
                    _ => {
                        println!("系统提示未更改");
                        continue;
                    }
                };
                engine.update_prompt(Some(prompt), None);
                println!("系统提示已更新");
            }
            ReplCommand::Template(name) => match load_template(&name) {
                Ok(template) => {
                    engine.update_prompt(None, Some(template));
                    println!("查询模板已更新: {name}");
                }
                Err(e) => {
                    error!("Failed to load template {}: {}", name, e);
                    println!("错误: 无法加载模板 {name}: {e}");
                }
            },
            ReplCommand::Reload => {
                if engine.reload().await {
                    println!("索引已重新加载");
                } else {
                    println!("错误: 没有可用的索引");
                }
            }
            ReplCommand::Image(prompt) => {
                println!("正在生成图像...");
                match images.generate_image(&prompt, &images.default_options()).await {
                    Ok(saved) => print_images(&saved)?,
                    Err(e) => {
                        error!("Image generation failed: {}", e);
                        println!("错误: 图像生成失败: {e}");
                    }
                }
            }
            ReplCommand::Analyze(text) => {
                println!("正在分析文本并生成图像...");
                match images.generate_image_with_text_analysis(&text).await {
                    Ok(saved) => print_images(&saved)?,
                    Err(e) => {
                        error!("Analyzed image generation failed: {}", e);
                        println!("错误: 图像生成失败: {e}");
                    }
                }
            }
            ReplCommand::Query(question) => match engine.query_with_sources(&question).await {
                Ok(response) => {
                    println!("\n回答:");
                    print_pretty(&response.answer)?;
                    print_sources(&response.source_nodes)?;
                }
                Err(e) => {
                    error!("Query failed: {}", e);
                    println!("错误: {e}");
                }
            },
        }
    }

    Ok(())
}
