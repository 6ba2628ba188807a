//! # Image generation
//!
//! [`ImageGenerator`] requests images from the OpenAI compatible `/images/generations`
//! endpoint and stores them as PNG files under `IMAGE_OUTPUT_DIR`.
//!
//! A batch is all-or-nothing: every returned image is fetched (or base64 decoded) and
//! re-encoded as PNG before the first file is written, and files already written are removed
//! if a later write fails. A successful call therefore yields one [`GeneratedImage`] per
//! image the API returned.
//!
//! [`generate_image_with_text_analysis`](ImageGenerator::generate_image_with_text_analysis)
//! first asks a chat model to turn free text into a descriptive image prompt. If that step
//! fails the image API is never called.

use crate::config::RagConfig;
use crate::llm::{CompletionOptions, Llm, create_client};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::images::{CreateImageRequestArgs, Image, ImageModel, ImageQuality, ImageSize, ImageStyle},
};
use base64::Engine as _;
use image::ImageFormat;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

/// Instruction given to the chat model when rewriting text into an image prompt.
pub const ANALYSIS_INSTRUCTION: &str = "你是一个专业的图像描述专家。你的任务是将用户的文本转换为详细、生动的图像生成提示。描述应该具体、富有想象力，并包含关键视觉细节，如光线、颜色、构图和风格。提示应该是中文的，长度适中（100-150字左右），并且能够捕捉用户意图的精髓。只返回图像描述，不要有其他解释或前缀。";

const ANALYSIS_OPTIONS: CompletionOptions = CompletionOptions {
    temperature: Some(0.7),
    max_tokens: Some(300),
};

/// Why an image request produced no images.
#[derive(Error, Debug)]
pub enum ImageGenerationError {
    #[error("Image API error: {0}")]
    Api(#[source] OpenAIError),

    #[error("Prompt analysis failed: {0}")]
    Analysis(#[source] OpenAIError),

    #[error("Prompt analysis returned an empty prompt")]
    EmptyAnalysis,

    #[error("Failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode image {index}: {reason}")]
    Decode { index: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid image {option}: {value}")]
    InvalidOption { option: &'static str, value: String },
}

/// One saved image.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    /// Remote URL, when the API returned one instead of inline data.
    pub url: Option<String>,
    pub local_path: PathBuf,
    /// The prompt that was sent to the image API.
    pub prompt: String,
    /// The prompt as rewritten by the image model, if it reported one.
    pub revised_prompt: Option<String>,
}

/// Size, quality, style and count of a request, as user-facing strings.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOptions {
    pub size: String,
    pub quality: String,
    pub style: String,
    pub n: u8,
}

impl ImageOptions {
    /// `IMAGE_SIZE`, `IMAGE_QUALITY` and `IMAGE_STYLE`, one image.
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            size: config.image_size.clone(),
            quality: config.image_quality.clone(),
            style: config.image_style.clone(),
            n: 1,
        }
    }

    fn parsed(&self) -> Result<(ImageSize, ImageQuality, ImageStyle), ImageGenerationError> {
        if !(1..=10).contains(&self.n) {
            return Err(ImageGenerationError::InvalidOption {
                option: "count",
                value: self.n.to_string(),
            });
        }
        Ok((
            parse_option("size", &self.size.to_lowercase())?,
            parse_option("quality", &self.quality.to_lowercase())?,
            parse_option("style", &self.style.to_lowercase())?,
        ))
    }
}

/// Parse an option through the API type's own serde names ("1024x1024", "hd", "vivid").
fn parse_option<T: DeserializeOwned>(option: &'static str, value: &str) -> Result<T, ImageGenerationError> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_string())).map_err(|_| {
        ImageGenerationError::InvalidOption {
            option,
            value: value.to_string(),
        }
    })
}

/// A fetched image, re-encoded as PNG and ready to write.
struct PendingImage {
    url: Option<String>,
    revised_prompt: Option<String>,
    png: Vec<u8>,
}

pub struct ImageGenerator {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    analyst: Llm,
    model: String,
    output_dir: PathBuf,
    defaults: ImageOptions,
}

impl std::fmt::Debug for ImageGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageGenerator")
            .field("model", &self.model)
            .field("analyst", &self.analyst)
            .field("output_dir", &self.output_dir)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl ImageGenerator {
    pub fn new(config: &RagConfig) -> Self {
        let client = create_client(config);
        Self {
            analyst: Llm::new(client.clone(), config.image_model.clone()),
            client,
            http: reqwest::Client::new(),
            model: config.image_generation_model.clone(),
            output_dir: config.image_output_dir.clone(),
            defaults: ImageOptions::from_config(config),
        }
    }

    /// Options taken from the configuration.
    pub fn default_options(&self) -> ImageOptions {
        self.defaults.clone()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Generate `options.n` images for `prompt` and save them.
    pub async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageOptions,
    ) -> Result<Vec<GeneratedImage>, ImageGenerationError> {
        let (size, quality, style) = options.parsed()?;
        let model: ImageModel = parse_option("model", &self.model)?;

        info!("Generating {} image(s) with {}: {}", options.n, self.model, prompt);

        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(model)
            .n(options.n)
            .size(size)
            .quality(quality)
            .style(style)
            .build()
            .map_err(ImageGenerationError::Api)?;

        let response = self
            .client
            .images()
            .generate(request)
            .await
            .map_err(|e| {
                error!("Image API request failed: {}", e);
                ImageGenerationError::Api(e)
            })?;

        let mut pending = Vec::with_capacity(response.data.len());
        for (index, image) in response.data.iter().enumerate() {
            let fetched = self.fetch(index, image).await.map_err(|e| {
                error!("Failed to fetch image {}: {}", index, e);
                e
            })?;
            pending.push(fetched);
        }

        let saved = self.save_all(prompt, pending)?;
        info!("Saved {} image(s) to {}", saved.len(), self.output_dir.display());
        Ok(saved)
    }

    /// Rewrite `text` into a descriptive image prompt with the analysis chat model.
    pub async fn analyze_text(&self, text: &str) -> Result<String, ImageGenerationError> {
        let request = format!("请为以下文本创建一个图像生成提示：\n\n{text}");
        let enhanced = self
            .analyst
            .chat(Some(ANALYSIS_INSTRUCTION), &request, ANALYSIS_OPTIONS)
            .await
            .map_err(|e| {
                error!("Prompt analysis failed: {}", e);
                ImageGenerationError::Analysis(e)
            })?;

        let enhanced = enhanced.trim();
        if enhanced.is_empty() {
            return Err(ImageGenerationError::EmptyAnalysis);
        }
        info!("Enhanced image prompt: {}", enhanced);
        Ok(enhanced.to_string())
    }

    /// Analyze `text` into a prompt, then generate one image with the default options.
    pub async fn generate_image_with_text_analysis(
        &self,
        text: &str,
    ) -> Result<Vec<GeneratedImage>, ImageGenerationError> {
        let prompt = self.analyze_text(text).await?;
        self.generate_image(&prompt, &self.defaults).await
    }

    async fn fetch(&self, index: usize, image: &Image) -> Result<PendingImage, ImageGenerationError> {
        let (url, revised_prompt, bytes) = match image {
            Image::Url { url, revised_prompt } => {
                let bytes = self.download(url).await?;
                (Some(url.clone()), revised_prompt.clone(), bytes)
            }
            Image::B64Json {
                b64_json,
                revised_prompt,
            } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(b64_json.as_bytes())
                    .map_err(|e| ImageGenerationError::Decode {
                        index,
                        reason: e.to_string(),
                    })?;
                (None, revised_prompt.clone(), bytes)
            }
        };

        let decoded = image::load_from_memory(&bytes).map_err(|e| ImageGenerationError::Decode {
            index,
            reason: e.to_string(),
        })?;
        let mut png = Cursor::new(Vec::new());
        decoded
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| ImageGenerationError::Decode {
                index,
                reason: e.to_string(),
            })?;

        Ok(PendingImage {
            url,
            revised_prompt,
            png: png.into_inner(),
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ImageGenerationError> {
        let to_error = |source: reqwest::Error| ImageGenerationError::Download {
            url: url.to_string(),
            source,
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(to_error)?;
        Ok(response.bytes().await.map_err(to_error)?.to_vec())
    }

    fn save_all(
        &self,
        prompt: &str,
        pending: Vec<PendingImage>,
    ) -> Result<Vec<GeneratedImage>, ImageGenerationError> {
        fs::create_dir_all(&self.output_dir)?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut saved: Vec<GeneratedImage> = Vec::with_capacity(pending.len());
        for (index, image) in pending.into_iter().enumerate() {
            let path = self.unique_path(&timestamp, index, prompt, &image.png);
            if let Err(e) = fs::write(&path, &image.png) {
                error!("Failed to write {}: {}", path.display(), e);
                for done in &saved {
                    let _ = fs::remove_file(&done.local_path);
                }
                return Err(e.into());
            }
            saved.push(GeneratedImage {
                url: image.url,
                local_path: path,
                prompt: prompt.to_string(),
                revised_prompt: image.revised_prompt,
            });
        }
        Ok(saved)
    }

    /// `image_<timestamp>_<index>_<hash>.png`, with `-k` appended while the name is taken.
    fn unique_path(&self, timestamp: &str, index: usize, prompt: &str, png: &[u8]) -> PathBuf {
        let mut hasher = blake3::Hasher::new();
        hasher.update(prompt.as_bytes());
        hasher.update(png);
        let digest = hasher.finalize().to_hex();
        let stem = format!("image_{timestamp}_{index}_{}", &digest.as_str()[..8]);

        let mut path = self.output_dir.join(format!("{stem}.png"));
        let mut k = 1;
        while path.exists() {
            path = self.output_dir.join(format!("{stem}-{k}.png"));
            k += 1;
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use image::{Rgb, RgbImage};
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn red_png() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn generator(root: &TempDir, server: &MockServer) -> ImageGenerator {
        let config = RagConfig {
            api_key: "mock_api_key".to_string(),
            api_base: server.base_url(),
            image_output_dir: root.path().join("images"),
            ..RagConfig::default()
        };
        ImageGenerator::new(&config)
    }

    #[test]
    fn test_options_validation() {
        let mut options = ImageOptions {
            size: "1024x1024".to_string(),
            quality: "HD".to_string(),
            style: "natural".to_string(),
            n: 1,
        };
        assert!(options.parsed().is_ok());

        options.size = "999x999".to_string();
        assert!(matches!(
            options.parsed(),
            Err(ImageGenerationError::InvalidOption { option: "size", .. })
        ));

        options.size = "1024x1024".to_string();
        options.n = 0;
        assert!(options.parsed().is_err());
    }

    #[tokio::test]
    async fn test_generate_two_images_from_urls() {
        let server = MockServer::start_async().await;
        let png = red_png();
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/red.png");
                then.status(200).header("content-type", "image/png").body(png.clone());
            })
            .await;
        let url = server.url("/files/red.png");
        let api = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/images/generations")
                    .body_includes("\"n\":2")
                    .body_includes("\"model\":\"dall-e-3\"");
                then.status(200).json_body(json!({
                    "created": 0,
                    "data": [
                        {"url": url, "revised_prompt": "a bright red circle"},
                        {"url": url}
                    ]
                }));
            })
            .await;

        let root = tempdir().unwrap();
        let generator = generator(&root, &server);
        let mut options = generator.default_options();
        options.n = 2;

        let images = generator.generate_image("a red circle", &options).await.unwrap();

        assert_eq!(images.len(), 2);
        assert_ne!(images[0].local_path, images[1].local_path);
        assert_eq!(images[0].revised_prompt.as_deref(), Some("a bright red circle"));
        for image in &images {
            assert_eq!(image.prompt, "a red circle");
            assert!(image.local_path.exists());
            let name = image.local_path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("image_") && name.ends_with(".png"), "{name}");
        }
        api.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_from_base64_payload() {
        let server = MockServer::start_async().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(red_png());
        server
            .mock_async(|when, then| {
                when.method(POST).path("/images/generations");
                then.status(200).json_body(json!({
                    "created": 0,
                    "data": [{"b64_json": encoded}]
                }));
            })
            .await;

        let root = tempdir().unwrap();
        let generator = generator(&root, &server);
        let images = generator
            .generate_image("a red circle", &generator.default_options())
            .await
            .unwrap();

        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, None);
        let saved = image::open(&images[0].local_path).unwrap();
        assert_eq!(saved.width(), 4);
    }

    #[tokio::test]
    async fn test_undecodable_batch_writes_nothing() {
        let server = MockServer::start_async().await;
        let good = base64::engine::general_purpose::STANDARD.encode(red_png());
        let bad = base64::engine::general_purpose::STANDARD.encode(b"not an image");
        server
            .mock_async(|when, then| {
                when.method(POST).path("/images/generations");
                then.status(200).json_body(json!({
                    "created": 0,
                    "data": [{"b64_json": good}, {"b64_json": bad}]
                }));
            })
            .await;

        let root = tempdir().unwrap();
        let generator = generator(&root, &server);
        let mut options = generator.default_options();
        options.n = 2;

        let result = generator.generate_image("a red circle", &options).await;
        assert!(matches!(result, Err(ImageGenerationError::Decode { index: 1, .. })));
        assert!(!root.path().join("images").exists());
    }

    #[tokio::test]
    async fn test_api_rejection_is_typed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/images/generations");
                then.status(400).json_body(json!({
                    "error": {
                        "message": "content policy violation",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;

        let root = tempdir().unwrap();
        let generator = generator(&root, &server);
        let result = generator
            .generate_image("a red circle", &generator.default_options())
            .await;
        assert!(matches!(result, Err(ImageGenerationError::Api(_))));
    }

    #[tokio::test]
    async fn test_failed_analysis_skips_image_api() {
        let server = MockServer::start_async().await;
        let chat = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_includes("图像描述专家");
                then.status(400).json_body(json!({
                    "error": {
                        "message": "model overloaded",
                        "type": "invalid_request_error",
                        "param": null,
                        "code": null
                    }
                }));
            })
            .await;
        let images = server
            .mock_async(|when, then| {
                when.method(POST).path("/images/generations");
                then.status(200).json_body(json!({"created": 0, "data": []}));
            })
            .await;

        let root = tempdir().unwrap();
        let generator = generator(&root, &server);
        let result = generator.generate_image_with_text_analysis("a red circle").await;

        assert!(matches!(result, Err(ImageGenerationError::Analysis(_))));
        assert_eq!(chat.calls_async().await, 1);
        assert_eq!(images.calls_async().await, 0);
    }

    #[test]
    fn test_unique_path_appends_suffix() {
        let root = tempdir().unwrap();
        let config = RagConfig {
            image_output_dir: root.path().to_path_buf(),
            ..RagConfig::default()
        };
        let generator = ImageGenerator::new(&config);

        let first = generator.unique_path("20240101_000000", 0, "p", b"png");
        fs::write(&first, b"x").unwrap();
        let second = generator.unique_path("20240101_000000", 0, "p", b"png");

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-1.png"));
    }
}
