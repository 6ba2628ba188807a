use awful_rag::config::RagConfig;
use awful_rag::image_generator::{ImageGenerationError, ImageGenerator};
use base64::Engine as _;
use httpmock::prelude::*;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::json;
use std::io::Cursor;
use tempfile::{TempDir, tempdir};

fn red_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb([220, 20, 20]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

fn generator(root: &TempDir, server: &MockServer) -> ImageGenerator {
    let config = RagConfig {
        api_key: "mock_api_key".to_string(),
        api_base: server.base_url(),
        image_output_dir: root.path().join("generated_images"),
        ..RagConfig::default()
    };
    ImageGenerator::new(&config)
}

fn error_body(message: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "type": "invalid_request_error",
            "param": null,
            "code": null
        }
    })
}

#[tokio::test]
async fn analyzed_prompt_is_sent_to_image_api() {
    let server = MockServer::start_async().await;
    let chat = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_includes("\"model\":\"gpt-4o\"")
                .body_includes("a red circle");
            then.status(200).json_body(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 0,
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "  白色背景上的一个鲜红色圆形  "},
                    "finish_reason": "stop"
                }]
            }));
        })
        .await;
    let encoded = base64::engine::general_purpose::STANDARD.encode(red_png());
    let images_api = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/images/generations")
                .body_includes("白色背景上的一个鲜红色圆形");
            then.status(200).json_body(json!({
                "created": 0,
                "data": [{"b64_json": encoded, "revised_prompt": "A vivid red circle."}]
            }));
        })
        .await;

    let root = tempdir().unwrap();
    let generator = generator(&root, &server);
    let images = generator
        .generate_image_with_text_analysis("a red circle")
        .await
        .unwrap();

    assert_eq!(images.len(), 1);
    assert_eq!(images[0].prompt, "白色背景上的一个鲜红色圆形");
    assert_eq!(images[0].revised_prompt.as_deref(), Some("A vivid red circle."));
    assert!(images[0].local_path.starts_with(generator.output_dir()));
    assert_eq!(image::open(&images[0].local_path).unwrap().width(), 8);
    chat.assert_async().await;
    images_api.assert_async().await;
}

#[tokio::test]
async fn failed_analysis_makes_no_image_request() {
    let server = MockServer::start_async().await;
    let chat = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(400).json_body(error_body("model not found"));
        })
        .await;
    let images_api = server
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
    assert_eq!(images_api.calls_async().await, 0);
    assert!(!root.path().join("generated_images").exists());
}

#[tokio::test]
async fn failed_download_saves_no_partial_batch() {
    let server = MockServer::start_async().await;
    let png = red_png();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/files/ok.png");
            then.status(200).body(png.clone());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/files/missing.png");
            then.status(404);
        })
        .await;
    let ok = server.url("/files/ok.png");
    let missing = server.url("/files/missing.png");
    server
        .mock_async(|when, then| {
            when.method(POST).path("/images/generations");
            then.status(200).json_body(json!({
                "created": 0,
                "data": [{"url": ok}, {"url": missing}]
            }));
        })
        .await;

    let root = tempdir().unwrap();
    let generator = generator(&root, &server);
    let mut options = generator.default_options();
    options.n = 2;

    let result = generator.generate_image("a red circle", &options).await;

    assert!(matches!(result, Err(ImageGenerationError::Download { .. })));
    assert!(!root.path().join("generated_images").exists());
}
