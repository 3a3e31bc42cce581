//! File extension to MIME type mapping used for uploads and edge responses.

use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content type for a path or key, derived only from its extension.
pub fn content_type_for(path: &str) -> &'static str {
    let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        return OCTET_STREAM;
    };

    match ext.to_ascii_lowercase().as_str() {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "eot" => "font/eot",
        _ => OCTET_STREAM,
    }
}
