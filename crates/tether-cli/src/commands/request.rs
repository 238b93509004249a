//! Request handlers

use std::path::Path;

use anyhow::{bail, Context, Result};

use tether_core::{ApiRequest, Method, MultipartPart};

use crate::output::Output;

/// Issue a GET request
pub async fn get(path: String, query: Vec<(String, String)>, output: &Output) -> Result<()> {
    let network = super::open_network().await?;

    let mut request = ApiRequest::get(path);
    for (key, value) in query {
        request = request.query(key, value);
    }

    let response = network.client.send(request).await?;
    output.print_response(&response);
    Ok(())
}

/// Issue a write request
pub async fn send(
    method: String,
    path: String,
    body: Option<String>,
    fields: Vec<(String, String)>,
    files: Vec<(String, String)>,
    output: &Output,
) -> Result<()> {
    let request = build_write(&method, path, body, fields, files)?;
    let network = super::open_network().await?;

    let response = network.client.send(request).await?;
    output.print_response(&response);
    Ok(())
}

fn build_write(
    method: &str,
    path: String,
    body: Option<String>,
    fields: Vec<(String, String)>,
    files: Vec<(String, String)>,
) -> Result<ApiRequest> {
    let method: Method = method.parse()?;
    if method.is_read() {
        bail!("Use `tether get` for GET requests");
    }

    let mut request = ApiRequest::new(method, path);

    if !fields.is_empty() || !files.is_empty() {
        let mut parts: Vec<MultipartPart> = fields
            .into_iter()
            .map(|(name, value)| MultipartPart::text(name, value))
            .collect();
        for (name, file_path) in files {
            parts.push(read_file_part(name, Path::new(&file_path))?);
        }
        request = request.multipart(parts);
    } else if let Some(body) = body {
        let value = serde_json::from_str(&body).context("Request body is not valid JSON")?;
        request = request.json(value);
    }

    Ok(request)
}

fn read_file_part(name: String, path: &Path) -> Result<MultipartPart> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok(MultipartPart::file(name, filename, None, data))
}
