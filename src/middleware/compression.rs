use crate::http::{Request, ResponseBody};
use crate::middleware::{Middleware, MiddlewareResult, Next};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use std::io::Write;

#[derive(Clone)]
pub struct CompressionConfig {
    pub level: Compression,
    pub min_size: usize,
    pub skip_types: Vec<String>,
}

impl CompressionConfig {
    fn should_compress(&self, content_type: Option<&str>, content_length: usize) -> bool {
        if content_length < self.min_size {
            return false;
        }
        if let Some(ct) = content_type {
            for skip_type in &self.skip_types {
                if ct.starts_with(skip_type) {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: Compression::default(),
            min_size: 1024,
            skip_types: vec![
                "image/".to_string(),
                "video/".to_string(),
                "audio/".to_string(),
                "application/pdf".to_string(),
                "application/zip".to_string(),
            ],
        }
    }
}

/// Compresses buffered response bodies when the client advertises support.
/// File and stream bodies pass through untouched; their bytes are not
/// available at this layer.
pub struct CompressionMiddleware {
    config: CompressionConfig,
}

impl CompressionMiddleware {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }
}

impl Middleware for CompressionMiddleware {
    fn call(&self, req: Request, next: Next) -> MiddlewareResult {
        let config = self.config.clone();
        Box::pin(async move {
            let accepted = req.header("accept-encoding").map(|h| h.to_lowercase());
            let mut response = next.handle(req).await?;

            let plain: Option<Vec<u8>> = match &response.body {
                ResponseBody::Text(text) => Some(text.as_bytes().to_vec()),
                ResponseBody::Bytes(bytes) => Some(bytes.clone()),
                _ => None,
            };
            let plain = match plain {
                Some(plain) => plain,
                None => return Ok(response),
            };

            let content_type = response.headers.get("Content-Type").cloned();
            if !config.should_compress(content_type.as_deref(), plain.len()) {
                return Ok(response);
            }

            if let Some(accepted) = accepted {
                let compressed = if accepted.contains("gzip") {
                    let mut encoder = GzEncoder::new(Vec::new(), config.level);
                    encoder.write_all(&plain)?;
                    response.header("Content-Encoding", "gzip");
                    Some(encoder.finish()?)
                } else if accepted.contains("deflate") {
                    let mut encoder = DeflateEncoder::new(Vec::new(), config.level);
                    encoder.write_all(&plain)?;
                    response.header("Content-Encoding", "deflate");
                    Some(encoder.finish()?)
                } else {
                    None
                };

                if let Some(compressed) = compressed {
                    response.header("Vary", "Accept-Encoding");
                    response.body = ResponseBody::Bytes(compressed);
                }
            }

            Ok(response)
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(Self::new(self.config.clone()))
    }
}
