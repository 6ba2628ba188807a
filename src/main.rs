//! Main module for the Awful RAG CLI application (arag).
//!
//! This module provides the main function: it installs logging, parses the command line,
//! loads the configuration (asking for an API key on first run) and dispatches to the
//! library.
//!
//! # Examples
//!
//! ```sh
//! arag index --docs_dir ./documents
//! arag query --query "What is the capital of France?"
//! arag update_prompt --system_prompt "Answer in one sentence."
//! arag generate_image --prompt "a red circle" --analyze
//! arag                      # interactive mode
//! ```

use awful_rag::{
    commands::{Cli, Commands},
    config::{self, API_KEY_KEY, RagConfig, SYSTEM_PROMPT_KEY},
    documents::DocumentProcessor,
    embeddings::Embedder,
    image_generator::{ImageGenerator, ImageOptions},
    interactive::interactive_mode,
    llm::Llm,
    pretty::{print_images, print_pretty, print_sources},
    query_engine::QueryEngine,
    template::load_template,
};
use clap::Parser;
use once_cell::sync::OnceCell;
use std::{
    error::Error,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Main asynchronous function of the Awful RAG CLI application.
///
/// Parses command-line arguments, loads configuration and executes the selected command.
/// Command failures are printed rather than returned; only startup failures (unreadable
/// settings file, failed API key capture) end the process with an error.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    debug!("Loading settings from: {}", cli.env_file.display());
    let mut rag_config = config::load_config(&cli.env_file)?;
    if rag_config.missing_api_key() {
        rag_config = capture_api_key(rag_config, &cli.env_file)?;
    }
    debug!("Model: {}, API base: {}", rag_config.model, rag_config.api_base);

    let command = cli.command.unwrap_or_default();
    if let Err(e) = dispatch(command, &rag_config, &cli.env_file).await {
        error!("Command failed: {}", e);
        println!("错误: {e}");
    }

    Ok(())
}

/// Ask for the API key, append it to the settings file and return the updated config.
fn capture_api_key(config: RagConfig, env_file: &Path) -> Result<RagConfig, Box<dyn Error>> {
    println!("警告: 未设置{API_KEY_KEY}环境变量");
    print!("请输入您的OpenAI API密钥 > ");
    io::stdout().flush()?;

    let mut api_key = String::new();
    io::stdin().lock().read_line(&mut api_key)?;
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err("未提供API密钥".into());
    }

    config::persist_setting(env_file, API_KEY_KEY, api_key)?;
    println!("API密钥已保存到{}文件", env_file.display());
    Ok(config.with_api_key(api_key))
}

async fn dispatch(command: Commands, config: &RagConfig, env_file: &Path) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Index {
            docs_dir,
            recursive,
        } => index(config, docs_dir, recursive).await,
        Commands::Query {
            query,
            system_prompt,
            template,
        } => {
            let Some(query) = query else {
                println!("错误: 请提供查询文本");
                return Ok(());
            };
            ask(config, &query, system_prompt, template).await
        }
        Commands::UpdatePrompt { system_prompt } => {
            config::persist_setting(env_file, SYSTEM_PROMPT_KEY, &system_prompt)?;
            println!("系统提示已更新并保存到{}文件", env_file.display());
            Ok(())
        }
        Commands::GenerateImage {
            prompt,
            size,
            quality,
            style,
            n,
            analyze,
        } => {
            let generator = ImageGenerator::new(config);
            let defaults = generator.default_options();
            let options = ImageOptions {
                size: size.unwrap_or(defaults.size),
                quality: quality.unwrap_or(defaults.quality),
                style: style.unwrap_or(defaults.style),
                n,
            };

            let prompt = if analyze {
                println!("正在分析文本...");
                let enhanced = generator.analyze_text(&prompt).await?;
                println!("增强后的提示: {enhanced}");
                enhanced
            } else {
                prompt
            };

            println!("正在生成图像...");
            let images = generator.generate_image(&prompt, &options).await?;
            print_images(&images)
        }
        Commands::Interactive => {
            let mut engine = open_engine(config).await?;
            let images = ImageGenerator::new(config);
            interactive_mode(&mut engine, &images, io::stdin().lock()).await
        }
    }
}

async fn index(config: &RagConfig, docs_dir: Option<PathBuf>, recursive: bool) -> Result<(), Box<dyn Error>> {
    let mut processor =
        DocumentProcessor::new(config, Embedder::from_config(config)?).with_recursive(recursive);
    if let Some(dir) = docs_dir {
        processor = processor.with_documents_dir(dir);
    }

    let documents = processor.load_documents(None)?;
    if documents.is_empty() {
        println!("错误: 目录 {} 中没有找到文档", processor.documents_dir().display());
        return Ok(());
    }

    let count = documents.len();
    match processor.process_documents(Some(documents)).await? {
        Some(index) => println!(
            "成功: {count} 个文档已成功索引 ({} 个文本块)",
            index.len()
        ),
        None => println!("错误: 文档中没有可索引的文本"),
    }
    Ok(())
}

async fn ask(
    config: &RagConfig,
    query: &str,
    system_prompt: Option<String>,
    template: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let mut engine = open_engine(config).await?;

    let system_prompt = system_prompt.filter(|prompt| *prompt != config.system_prompt);
    let template = template.as_deref().map(load_template).transpose()?;
    if system_prompt.is_some() || template.is_some() {
        engine.update_prompt(system_prompt, template);
    }

    let response = engine.query_with_sources(query).await?;
    println!("\n回答:");
    print_pretty(&response.answer)?;
    print_sources(&response.source_nodes)
}

async fn open_engine(config: &RagConfig) -> Result<QueryEngine, Box<dyn Error>> {
    let processor = DocumentProcessor::new(config, Embedder::from_config(config)?);
    Ok(QueryEngine::open(config, processor, Llm::from_config(config)).await)
}
