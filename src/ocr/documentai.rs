//! REST client for Google Document AI, the production [`OcrService`].
//!
//! One configured client serves both tiers: the basic tier is routed to the
//! basic (entity extractor) processor, the premium tier to the premium OCR
//! processor with math and selection-mark recognition switched on.
//!
//! Document AI serialises `int64` fields as JSON strings and omits
//! zero-valued fields, so the wire structs below default everything and
//! accept indices either as numbers or as strings.

use super::{
    OcrBlock, OcrDocument, OcrEntity, OcrError, OcrPage, OcrPageRef, OcrRequest, OcrService,
    OcrTier, Vertex,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// How the client authenticates.
#[derive(Clone)]
pub enum Credentials {
    /// OAuth2 bearer token, e.g. from `gcloud auth print-access-token`.
    AccessToken(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::AccessToken(_) => f.write_str("AccessToken(<redacted>)"),
        }
    }
}

/// Connection settings for the OCR service, built once per process.
#[derive(Debug, Clone)]
pub struct DocumentAiConfig {
    pub credentials: Credentials,
    pub project_id: String,
    /// Processor region, e.g. `us` or `eu`.
    pub location: String,
    pub basic_processor_id: String,
    pub premium_processor_id: String,
    /// Override for the API base URL. Defaults to the regional endpoint.
    pub endpoint: Option<String>,
}

impl DocumentAiConfig {
    /// Read the configuration from `DOCUMENTAI_*` environment variables.
    pub fn from_env() -> Result<Self, OcrError> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| OcrError::NotConfigured(format!("{name} is not set")))
        };

        Ok(Self {
            credentials: Credentials::AccessToken(var("DOCUMENTAI_ACCESS_TOKEN")?),
            project_id: var("DOCUMENTAI_PROJECT_ID")?,
            location: var("DOCUMENTAI_LOCATION").unwrap_or_else(|_| "us".to_string()),
            basic_processor_id: var("DOCUMENTAI_BASIC_PROCESSOR_ID")?,
            premium_processor_id: var("DOCUMENTAI_PREMIUM_PROCESSOR_ID")?,
            endpoint: var("DOCUMENTAI_ENDPOINT").ok(),
        })
    }

    fn processor_id(&self, tier: OcrTier) -> &str {
        match tier {
            OcrTier::Basic => &self.basic_processor_id,
            OcrTier::Premium => &self.premium_processor_id,
        }
    }

    /// The `:process` URL for the processor serving `tier`.
    pub fn process_url(&self, tier: OcrTier) -> String {
        let base = self
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}-documentai.googleapis.com", self.location));
        format!(
            "{}/v1/projects/{}/locations/{}/processors/{}:process",
            base.trim_end_matches('/'),
            self.project_id,
            self.location,
            self.processor_id(tier)
        )
    }
}

/// [`OcrService`] backed by the Document AI REST API.
pub struct DocumentAiClient {
    config: DocumentAiConfig,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl DocumentAiClient {
    /// `request_timeout` bounds the HTTP exchange; the pipeline applies its
    /// own per-call timeout on top.
    pub fn new(config: DocumentAiConfig, request_timeout: Duration) -> Result<Self, OcrError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OcrError::Request(e.to_string()))?;
        Ok(Self {
            config,
            http,
            request_timeout,
        })
    }
}

#[async_trait]
impl OcrService for DocumentAiClient {
    async fn process(&self, request: &OcrRequest) -> Result<OcrDocument, OcrError> {
        let url = self.config.process_url(request.tier);
        let body = build_request(request);
        info!(
            "Document AI {} call: {} bytes ({})",
            request.tier,
            request.content.len(),
            request.mime_type
        );

        let Credentials::AccessToken(token) = &self.config.credentials;
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OcrError::Timeout {
                        secs: self.request_timeout.as_secs_f64().ceil() as u64,
                    }
                } else {
                    OcrError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ProcessResponse = response
            .json()
            .await
            .map_err(|e| OcrError::Decode(e.to_string()))?;
        let doc = into_document(parsed.document);
        debug!(
            "Document AI returned {} pages, {} entities, {} chars",
            doc.pages.len(),
            doc.entities.len(),
            doc.text.len()
        );
        Ok(doc)
    }
}

// ── Request wire types ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest {
    raw_document: RawDocument,
    skip_human_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    process_options: Option<WireProcessOptions>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    content: String,
    mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireProcessOptions {
    ocr_config: WireOcrConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOcrConfig {
    enable_native_pdf_parsing: bool,
    enable_image_quality_scores: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    premium_features: Option<PremiumFeatures>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PremiumFeatures {
    enable_math_ocr: bool,
    enable_selection_mark_detection: bool,
}

fn build_request(request: &OcrRequest) -> ProcessRequest {
    let opts = request.options;
    let process_options = (!opts.is_empty()).then(|| WireProcessOptions {
        ocr_config: WireOcrConfig {
            enable_native_pdf_parsing: opts.native_pdf_parsing,
            enable_image_quality_scores: opts.image_quality_scores,
            premium_features: (opts.math_ocr || opts.selection_marks).then_some(PremiumFeatures {
                enable_math_ocr: opts.math_ocr,
                enable_selection_mark_detection: opts.selection_marks,
            }),
        },
    });

    ProcessRequest {
        raw_document: RawDocument {
            content: STANDARD.encode(&request.content),
            mime_type: request.mime_type.clone(),
        },
        skip_human_review: true,
        process_options,
    }
}

// ── Response wire types ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProcessResponse {
    document: WireDocument,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireDocument {
    text: String,
    pages: Vec<WirePage>,
    entities: Vec<WireEntity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WirePage {
    #[serde(deserialize_with = "de_index")]
    page_number: usize,
    dimension: Option<Dimension>,
    layout: Option<Layout>,
    paragraphs: Vec<LayoutHolder>,
    lines: Vec<LayoutHolder>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Dimension {
    width: f32,
    height: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LayoutHolder {
    layout: Layout,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Layout {
    text_anchor: Option<TextAnchor>,
    confidence: f32,
    bounding_poly: Option<BoundingPoly>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TextAnchor {
    text_segments: Vec<TextSegment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TextSegment {
    #[serde(deserialize_with = "de_index")]
    start_index: usize,
    #[serde(deserialize_with = "de_index")]
    end_index: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BoundingPoly {
    normalized_vertices: Vec<Vertex>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireEntity {
    #[serde(rename = "type")]
    label: String,
    mention_text: String,
    confidence: f32,
    page_anchor: Option<PageAnchor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PageAnchor {
    page_refs: Vec<WirePageRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WirePageRef {
    #[serde(deserialize_with = "de_index")]
    page: usize,
    bounding_poly: Option<BoundingPoly>,
}

/// Accept `int64` values sent either as JSON numbers or as strings.
fn de_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Num(n)) => Ok(n as usize),
        Some(Raw::Str(s)) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ── Wire → domain ────────────────────────────────────────────────────────

/// Char-index view over the document text; text anchors count characters.
struct TextIndex<'a> {
    text: &'a str,
    offsets: Vec<usize>,
}

impl<'a> TextIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        Self { text, offsets }
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        let last = self.offsets.len() - 1;
        let (s, e) = (start.min(last), end.min(last));
        if s >= e {
            return "";
        }
        &self.text[self.offsets[s]..self.offsets[e]]
    }

    fn resolve(&self, anchor: Option<&TextAnchor>) -> String {
        anchor
            .map(|a| {
                a.text_segments
                    .iter()
                    .map(|seg| self.slice(seg.start_index, seg.end_index))
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

fn vertices(poly: Option<&BoundingPoly>) -> Vec<Vertex> {
    poly.map(|p| p.normalized_vertices.clone())
        .unwrap_or_default()
}

fn into_document(wire: WireDocument) -> OcrDocument {
    let index = TextIndex::new(&wire.text);

    let pages = wire
        .pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            let layout = page.layout.as_ref();
            // Prefer paragraphs; some processors only emit lines.
            let holders = if page.paragraphs.is_empty() {
                &page.lines
            } else {
                &page.paragraphs
            };
            let blocks = holders
                .iter()
                .map(|h| OcrBlock {
                    text: index.resolve(h.layout.text_anchor.as_ref()).trim().to_string(),
                    polygon: vertices(h.layout.bounding_poly.as_ref()),
                    confidence: h.layout.confidence,
                })
                .filter(|b| !b.text.is_empty())
                .collect();

            OcrPage {
                page_number: if page.page_number == 0 {
                    i + 1
                } else {
                    page.page_number
                },
                width: page.dimension.as_ref().map(|d| d.width).unwrap_or_default(),
                height: page.dimension.as_ref().map(|d| d.height).unwrap_or_default(),
                text: index.resolve(layout.and_then(|l| l.text_anchor.as_ref())),
                confidence: layout.map(|l| l.confidence).unwrap_or_default(),
                blocks,
            }
        })
        .collect();

    let entities = wire
        .entities
        .into_iter()
        .map(|e| OcrEntity {
            label: e.label,
            mention_text: e.mention_text,
            confidence: e.confidence,
            page_refs: e
                .page_anchor
                .map(|a| {
                    a.page_refs
                        .into_iter()
                        .map(|r| OcrPageRef {
                            page_index: r.page,
                            vertices: vertices(r.bounding_poly.as_ref()),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    OcrDocument {
        text: wire.text,
        pages,
        entities,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::ProcessOptions;

    fn config() -> DocumentAiConfig {
        DocumentAiConfig {
            credentials: Credentials::AccessToken("secret-token".into()),
            project_id: "exam-project".into(),
            location: "eu".into(),
            basic_processor_id: "basic123".into(),
            premium_processor_id: "premium456".into(),
            endpoint: None,
        }
    }

    #[test]
    fn process_url_routes_by_tier() {
        let c = config();
        assert_eq!(
            c.process_url(OcrTier::Basic),
            "https://eu-documentai.googleapis.com/v1/projects/exam-project/locations/eu/processors/basic123:process"
        );
        assert!(c.process_url(OcrTier::Premium).ends_with("/processors/premium456:process"));
    }

    #[test]
    fn endpoint_override_is_used() {
        let mut c = config();
        c.endpoint = Some("http://localhost:8080/".into());
        assert!(c
            .process_url(OcrTier::Basic)
            .starts_with("http://localhost:8080/v1/projects/"));
    }

    #[tokio::test]
    async fn http_timeout_reports_configured_duration() {
        // Accepts the connection and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let mut c = config();
        c.endpoint = Some(format!("http://{addr}"));
        let client = DocumentAiClient::new(c, Duration::from_secs(1)).unwrap();
        let req = OcrRequest::pdf(b"%PDF".to_vec(), OcrTier::Basic, ProcessOptions::default());
        let err = client.process(&req).await.unwrap_err();
        assert!(matches!(err, OcrError::Timeout { secs: 1 }), "got {err:?}");
        assert_eq!(err.to_string(), "OCR call timed out after 1s");
    }

    #[test]
    fn debug_redacts_token() {
        let dbg = format!("{:?}", config());
        assert!(!dbg.contains("secret-token"));
        assert!(dbg.contains("redacted"));
    }

    #[test]
    fn premium_request_enables_math_and_selection_marks() {
        let req = OcrRequest::pdf(b"%PDF".to_vec(), OcrTier::Premium, ProcessOptions::premium());
        let json = serde_json::to_value(build_request(&req)).unwrap();
        let features = &json["processOptions"]["ocrConfig"]["premiumFeatures"];
        assert_eq!(features["enableMathOcr"], true);
        assert_eq!(features["enableSelectionMarkDetection"], true);
        assert_eq!(json["rawDocument"]["mimeType"], "application/pdf");
        assert_eq!(json["rawDocument"]["content"], STANDARD.encode(b"%PDF"));
    }

    #[test]
    fn basic_request_sends_no_options() {
        let req = OcrRequest::pdf(b"%PDF".to_vec(), OcrTier::Basic, ProcessOptions::default());
        let json = serde_json::to_value(build_request(&req)).unwrap();
        assert!(json.get("processOptions").is_none());
    }

    #[test]
    fn parses_entities_pages_and_string_indices() {
        let body = r#"{
          "document": {
            "text": "Q1 What is 2+2?\nAnswer: 4\n",
            "pages": [{
              "pageNumber": 1,
              "dimension": {"width": 1700, "height": 2200, "unit": "pixels"},
              "layout": {
                "textAnchor": {"textSegments": [{"endIndex": "26"}]},
                "confidence": 0.97
              },
              "paragraphs": [
                {"layout": {
                  "textAnchor": {"textSegments": [{"endIndex": "16"}]},
                  "confidence": 0.9,
                  "boundingPoly": {"normalizedVertices": [{"x": 0.1}, {"x": 0.9, "y": 0.1}]}
                }},
                {"layout": {
                  "textAnchor": {"textSegments": [{"startIndex": "16", "endIndex": "26"}]},
                  "confidence": 0.8
                }}
              ]
            }],
            "entities": [{
              "type": "question",
              "mentionText": "What is 2+2?",
              "confidence": 0.88,
              "pageAnchor": {"pageRefs": [{
                "boundingPoly": {"normalizedVertices": [
                  {"x": 0.1, "y": 0.1}, {"x": 0.9, "y": 0.1},
                  {"x": 0.9, "y": 0.2}, {"x": 0.1, "y": 0.2}
                ]}
              }]}
            }]
          }
        }"#;

        let parsed: ProcessResponse = serde_json::from_str(body).unwrap();
        let doc = into_document(parsed.document);

        assert_eq!(doc.pages.len(), 1);
        let page = &doc.pages[0];
        assert_eq!(page.page_number, 1);
        assert_eq!(page.width, 1700.0);
        assert_eq!(page.text, "Q1 What is 2+2?\nAnswer: 4\n");
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[0].text, "Q1 What is 2+2?");
        assert_eq!(page.blocks[0].polygon[0], Vertex::new(0.1, 0.0));
        assert_eq!(page.blocks[1].text, "Answer: 4");

        assert_eq!(doc.entities.len(), 1);
        let entity = &doc.entities[0];
        assert_eq!(entity.label, "question");
        assert_eq!(entity.page_refs.len(), 1);
        assert_eq!(entity.page_refs[0].page_index, 0);
        assert_eq!(entity.page_refs[0].vertices.len(), 4);
    }

    #[test]
    fn text_index_handles_multibyte_characters() {
        let index = TextIndex::new("x² + y² = r²");
        assert_eq!(index.slice(0, 2), "x²");
        assert_eq!(index.slice(10, 99), "r²");
        assert_eq!(index.slice(5, 2), "");
    }
}
