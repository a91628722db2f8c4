use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::models::tool::Tool;

/// Name under which the retrieval capability is exposed to the model.
pub const KNOWLEDGE_BASE_TOOL: &str = "knowledge_base_retriever";

/// Number of top-ranked documents requested per query.
pub const TOP_K: usize = 5;

/// Metadata key carrying the caption for image documents.
const IMAGE_DESCRIPTION_KEY: &str = "x-amz-bedrock-kb-description";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub source_metadata: HashMap<String, Value>,
}

/// A single retrieval result from the knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn text<S: Into<String>>(content: S) -> Self {
        Document {
            content: content.into(),
            metadata: DocumentMetadata {
                doc_type: Some("text".to_string()),
                source_metadata: HashMap::new(),
            },
        }
    }
}

/// Normalize a retrieved document into plain text.
///
/// Text documents pass through unchanged. Image documents have their content
/// replaced with the caption from the source metadata, or an empty string
/// when no caption is present. Documents of any other type are unhandled and
/// yield `None`; callers drop them.
pub fn extract_document_content(document: Document) -> Option<Document> {
    let doc_type = document.metadata.doc_type.as_deref().map(str::to_lowercase);
    match doc_type.as_deref() {
        Some("text") => Some(document),
        Some("image") => {
            let caption = document
                .metadata
                .source_metadata
                .get(IMAGE_DESCRIPTION_KEY)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(Document {
                content: caption,
                metadata: document.metadata,
            })
        }
        _ => None,
    }
}

/// Declaration of the retrieval tool bound to the model during the
/// query-decision step.
pub fn knowledge_base_tool() -> Tool {
    Tool::new(
        KNOWLEDGE_BASE_TOOL,
        "Search and retrieve information from the knowledge base.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Short, plain-text, search-optimized query"
                }
            },
            "required": ["query"]
        }),
    )
}

/// A searchable document index queried by natural-language text.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Retrieve the top-ranked documents for a free-text query, already
    /// normalized to plain text.
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>>;
}

/// Connection settings for the hosted knowledge-base retrieval service.
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeBaseConfig {
    pub host: String,
    pub id: String,
}

/// Knowledge base client talking to a hosted retrieval service over HTTP.
pub struct HttpKnowledgeBase {
    client: Client,
    config: KnowledgeBaseConfig,
}

impl HttpKnowledgeBase {
    pub fn new(config: KnowledgeBaseConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let url = format!(
            "{}/knowledgebases/{}/retrieve",
            self.config.host.trim_end_matches('/'),
            self.config.id
        );

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "query": query,
                "numberOfResults": TOP_K,
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let documents: Vec<Document> = response.json().await?;
                Ok(documents
                    .into_iter()
                    .filter_map(|document| {
                        let doc_type = document.metadata.doc_type.clone();
                        let extracted = extract_document_content(document);
                        if extracted.is_none() {
                            warn!(?doc_type, "dropping document with unhandled type");
                        }
                        extracted
                    })
                    .collect())
            }
            status => Err(anyhow!("Knowledge base request failed: {}", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn image_document(caption: Option<&str>) -> Document {
        let mut source_metadata = HashMap::new();
        if let Some(caption) = caption {
            source_metadata.insert(IMAGE_DESCRIPTION_KEY.to_string(), json!(caption));
        }
        Document {
            content: "base64-bytes".to_string(),
            metadata: DocumentMetadata {
                doc_type: Some("image".to_string()),
                source_metadata,
            },
        }
    }

    #[test]
    fn test_text_document_passes_through() {
        let document = Document::text("refunds take 5 days");
        let extracted = extract_document_content(document.clone()).unwrap();
        assert_eq!(extracted, document);

        // Extraction is idempotent on already-normalized documents
        let twice = extract_document_content(extracted.clone()).unwrap();
        assert_eq!(twice.content, extracted.content);
    }

    #[test]
    fn test_image_document_uses_caption() {
        let extracted = extract_document_content(image_document(Some("a refund form"))).unwrap();
        assert_eq!(extracted.content, "a refund form");
    }

    #[test]
    fn test_image_document_without_caption_yields_empty_content() {
        let extracted = extract_document_content(image_document(None)).unwrap();
        assert_eq!(extracted.content, "");
    }

    #[test]
    fn test_unhandled_document_type_is_dropped() {
        let document = Document {
            content: "audio-bytes".to_string(),
            metadata: DocumentMetadata {
                doc_type: Some("audio".to_string()),
                source_metadata: HashMap::new(),
            },
        };
        assert_eq!(extract_document_content(document), None);

        let untyped = Document {
            content: "???".to_string(),
            metadata: DocumentMetadata::default(),
        };
        assert_eq!(extract_document_content(untyped), None);
    }

    #[test]
    fn test_type_matching_is_case_insensitive() {
        let document = Document {
            content: "refunds take 5 days".to_string(),
            metadata: DocumentMetadata {
                doc_type: Some("Text".to_string()),
                source_metadata: HashMap::new(),
            },
        };
        assert!(extract_document_content(document).is_some());
    }

    #[tokio::test]
    async fn test_retrieve_posts_query_and_extracts_documents() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/knowledgebases/kb-test/retrieve"))
            .and(body_json(json!({
                "query": "refund policy",
                "numberOfResults": 5,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "content": "Refunds are processed within 5 business days.",
                    "metadata": {"type": "text"}
                },
                {
                    "content": "base64-bytes",
                    "metadata": {
                        "type": "image",
                        "source_metadata": {
                            "x-amz-bedrock-kb-description": "a chart of refund timelines"
                        }
                    }
                },
                {
                    "content": "audio-bytes",
                    "metadata": {"type": "audio"}
                }
            ])))
            .mount(&mock_server)
            .await;

        let knowledge_base = HttpKnowledgeBase::new(KnowledgeBaseConfig {
            host: mock_server.uri(),
            id: "kb-test".to_string(),
        })?;

        let documents = knowledge_base.retrieve("refund policy").await?;
        assert_eq!(documents.len(), 2);
        assert_eq!(
            documents[0].content,
            "Refunds are processed within 5 business days."
        );
        assert_eq!(documents[1].content, "a chart of refund timelines");
        Ok(())
    }

    #[tokio::test]
    async fn test_retrieve_propagates_service_failure() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/knowledgebases/kb-test/retrieve"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let knowledge_base = HttpKnowledgeBase::new(KnowledgeBaseConfig {
            host: mock_server.uri(),
            id: "kb-test".to_string(),
        })?;

        assert!(knowledge_base.retrieve("refund policy").await.is_err());
        Ok(())
    }
}
