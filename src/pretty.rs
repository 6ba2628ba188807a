//! # Pretty printing
//!
//! Terminal rendering for answers and command results.
//!
//! Answers from the chat model are often markdown, so [`print_pretty`] renders:
//!
//! | Markdown | Terminal |
//! |----------|----------|
//! | `# Header` (up to `###`) | bold cyan |
//! | `**bold**` | bold |
//! | `*italic*` | italic |
//! | `` `code` `` | yellow |
//! | fenced code blocks | syntax highlighted (`base16-ocean.dark`, 24-bit color) |
//!
//! Everything is rendered into any [`Write`] first, so the output can be captured in tests.
//! [`print_sources`] and [`print_images`] format retrieval sources and saved images.

use crate::image_generator::GeneratedImage;
use crate::vector_store::NodeWithScore;
use crossterm::{
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::error::Error;
use std::io::{Write, stdout};
use syntect::easy::HighlightLines;
use syntect::highlighting::{Style, Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::{LinesWithEndings, as_24_bit_terminal_escaped};

static SYNTAXES: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);
static THEMES: Lazy<ThemeSet> = Lazy::new(ThemeSet::load_defaults);

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```([\w+#-]*)[^\n]*\n([\s\S]*?)```").expect("valid regex"));
static INLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"`([^`]+)`|\*\*([^*]+)\*\*|\*([^*\s][^*]*)\*").expect("valid regex")
});

/// Print markdown text with formatting and highlighted code blocks to stdout.
pub fn print_pretty(text: &str) -> Result<(), Box<dyn Error>> {
    let mut out = stdout().lock();
    render_markdown(text, &mut out)?;
    out.flush()?;
    Ok(())
}

/// Render markdown into `out`.
pub fn render_markdown(text: &str, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    let mut last_end = 0;

    for cap in CODE_BLOCK.captures_iter(text) {
        let Some(whole) = cap.get(0) else { continue };
        if whole.start() > last_end {
            render_lines(&text[last_end..whole.start()], out)?;
        }

        let language = cap.get(1).map_or("", |m| m.as_str());
        let code = cap.get(2).map_or("", |m| m.as_str());
        render_code_block(code, language, out)?;

        last_end = whole.end();
    }

    if last_end < text.len() {
        render_lines(&text[last_end..], out)?;
    }
    Ok(())
}

fn render_lines(text: &str, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    for line in text.lines() {
        let header = ["### ", "## ", "# "]
            .iter()
            .find_map(|marker| line.strip_prefix(marker));

        match header {
            Some(title) => {
                queue!(
                    out,
                    SetForegroundColor(Color::Cyan),
                    SetAttribute(Attribute::Bold),
                    Print(title),
                    SetAttribute(Attribute::Reset),
                    ResetColor,
                    Print("\n")
                )?;
            }
            None => writeln!(out, "{}", render_inline(line))?,
        }
    }
    Ok(())
}

/// Apply inline code, bold and italic styling in a single pass.
pub fn render_inline(line: &str) -> String {
    INLINE
        .replace_all(line, |caps: &Captures| {
            if let Some(code) = caps.get(1) {
                format!("\x1b[33m{}\x1b[0m", code.as_str())
            } else if let Some(bold) = caps.get(2) {
                format!("\x1b[1m{}\x1b[0m", bold.as_str())
            } else {
                format!("\x1b[3m{}\x1b[0m", &caps[3])
            }
        })
        .into_owned()
}

fn render_code_block(code: &str, language: &str, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    if !language.is_empty() {
        queue!(
            out,
            SetForegroundColor(Color::DarkGrey),
            SetAttribute(Attribute::Italic),
            Print(format!("[{language}]\n")),
            SetAttribute(Attribute::Reset),
            ResetColor
        )?;
    }

    let syntaxes = &*SYNTAXES;
    let syntax = syntaxes
        .find_syntax_by_token(language)
        .or_else(|| syntaxes.find_syntax_by_extension(language))
        .or_else(|| match language.to_lowercase().as_str() {
            "py" => syntaxes.find_syntax_by_extension("py"),
            "js" | "javascript" => syntaxes.find_syntax_by_extension("js"),
            "sh" | "bash" | "shell" => syntaxes.find_syntax_by_extension("sh"),
            "yml" => syntaxes.find_syntax_by_extension("yaml"),
            _ => None,
        })
        .unwrap_or_else(|| syntaxes.find_syntax_plain_text());

    let mut highlighter = HighlightLines::new(syntax, theme()?);
    for line in LinesWithEndings::from(code) {
        let ranges: Vec<(Style, &str)> = highlighter.highlight_line(line, syntaxes)?;
        write!(out, "{}", as_24_bit_terminal_escaped(&ranges[..], false))?;
        queue!(out, SetAttribute(Attribute::Reset))?;
    }
    writeln!(out)?;
    Ok(())
}

fn theme() -> Result<&'static Theme, Box<dyn Error>> {
    THEMES
        .themes
        .get("base16-ocean.dark")
        .ok_or_else(|| "missing base16-ocean.dark theme".into())
}

/// Print the chunks an answer was based on: file name and similarity score.
pub fn print_sources(sources: &[NodeWithScore]) -> Result<(), Box<dyn Error>> {
    let mut out = stdout().lock();
    render_sources(sources, &mut out)?;
    out.flush()?;
    Ok(())
}

pub fn render_sources(sources: &[NodeWithScore], out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    if sources.is_empty() {
        return Ok(());
    }
    queue!(out, SetForegroundColor(Color::DarkGrey), Print("\n来源:\n"))?;
    for (rank, hit) in sources.iter().enumerate() {
        let name = hit
            .node
            .metadata
            .get("file_name")
            .map_or("<text>", String::as_str);
        queue!(out, Print(format!("  {}. {} (相似度 {:.3})\n", rank + 1, name, hit.score)))?;
    }
    queue!(out, ResetColor)?;
    Ok(())
}

/// Print where each generated image was saved.
pub fn print_images(images: &[GeneratedImage]) -> Result<(), Box<dyn Error>> {
    let mut out = stdout().lock();
    for (i, image) in images.iter().enumerate() {
        queue!(
            out,
            SetForegroundColor(Color::Green),
            Print(format!("图像 {} 已保存: {}\n", i + 1, image.local_path.display())),
            ResetColor
        )?;
        if let Some(url) = &image.url {
            writeln!(out, "  URL: {url}")?;
        }
        if let Some(revised) = &image.revised_prompt {
            writeln!(out, "  修订后的提示: {revised}")?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::TextNode;
    use std::collections::BTreeMap;

    fn render(text: &str) -> String {
        let mut out = Vec::new();
        render_markdown(text, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_inline_styles() {
        assert_eq!(render_inline("a `b` c"), "a \x1b[33mb\x1b[0m c");
        assert_eq!(render_inline("**bold**"), "\x1b[1mbold\x1b[0m");
        assert_eq!(render_inline("*it*"), "\x1b[3mit\x1b[0m");
        assert_eq!(render_inline("2 * 3 * 4"), "2 * 3 * 4");
    }

    #[test]
    fn test_headers_drop_markers() {
        let rendered = render("# Title\n## Sub\nplain");
        assert!(rendered.contains("Title"));
        assert!(!rendered.contains("# Title"));
        assert!(!rendered.contains("## Sub"));
        assert!(rendered.ends_with("plain\n"));
    }

    #[test]
    fn test_code_block_is_highlighted() {
        let rendered = render("before\n```rust\nfn main() {}\n```\nafter");
        assert!(rendered.contains("[rust]"));
        assert!(rendered.contains("main"));
        assert!(!rendered.contains("```"));
        assert!(rendered.contains("\x1b[38;2;"));
        assert!(rendered.contains("after"));
    }

    #[test]
    fn test_unknown_language_falls_back_to_plain_text() {
        let rendered = render("```nosuchlang\nhello\n```");
        assert!(rendered.contains("hello"));
    }

    #[test]
    fn test_render_sources() {
        let mut metadata = BTreeMap::new();
        metadata.insert("file_name".to_string(), "hello.txt".to_string());
        let sources = vec![NodeWithScore {
            node: TextNode::new("d", 0, "Paris", metadata, vec![1.0]),
            score: 0.91234,
        }];

        let mut out = Vec::new();
        render_sources(&sources, &mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("1. hello.txt (相似度 0.912)"));

        let mut empty = Vec::new();
        render_sources(&[], &mut empty).unwrap();
        assert!(empty.is_empty());
    }
}
