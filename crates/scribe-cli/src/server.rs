// ============================================================================
// HTTP endpoint - JSON access to answers and embedding stats
// ============================================================================
// Routes:
//   POST /api/rag/ask            {"question": "..."} -> {answer, citations}
//   GET  /api/embeddings/stats   vector store counts per kind
// ============================================================================

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use scribe_core::{RagError, RagService, VectorStore};

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

pub struct ApiContext {
    pub rag: Arc<RagService>,
    pub vectors: VectorStore,
    pub runtime: Handle,
}

/// HTTP status for a core error
pub fn status_for(error: &RagError) -> u16 {
    match error {
        RagError::InvalidRequest(_) => 400,
        RagError::NotFound(_) => 404,
        RagError::Configuration(_) => 503,
        RagError::Upstream { .. } => 502,
        RagError::Data(_) | RagError::Storage(_) => 500,
    }
}

fn error_body(error: &RagError) -> (u16, Value) {
    (status_for(error), json!({ "error": error.to_string() }))
}

/// Dispatch one request. Blocks on the runtime for async work, so call it
/// from a blocking thread, never from inside the runtime.
pub fn route(ctx: &ApiContext, method: &Method, url: &str, body: &str) -> (u16, Value) {
    let path = url.split('?').next().unwrap_or(url);

    match (method, path) {
        (Method::Post, "/api/rag/ask") => {
            let request: AskRequest = match serde_json::from_str(body) {
                Ok(request) => request,
                Err(e) => {
                    return (400, json!({ "error": format!("invalid request body: {}", e) }));
                }
            };
            match ctx.runtime.block_on(ctx.rag.answer(&request.question)) {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(value) => (200, value),
                    Err(e) => (500, json!({ "error": e.to_string() })),
                },
                Err(e) => {
                    warn!("Ask failed: {}", e);
                    error_body(&e)
                }
            }
        }
        (Method::Get, "/api/embeddings/stats") => match ctx.vectors.stats() {
            Ok(stats) => (200, json!(stats)),
            Err(e) => error_body(&e),
        },
        (_, "/api/rag/ask") | (_, "/api/embeddings/stats") => {
            (405, json!({ "error": "method not allowed" }))
        }
        _ => (404, json!({ "error": format!("no route for {}", path) })),
    }
}

fn handle(ctx: &ApiContext, mut request: Request) {
    let mut body = String::new();
    let (status, value) = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => route(ctx, request.method(), request.url(), &body),
        Err(e) => (400, json!({ "error": format!("unreadable body: {}", e) })),
    };
    debug!("{} {} -> {}", request.method(), request.url(), status);

    let mut response = Response::from_string(value.to_string()).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        error!("Failed to send response: {}", e);
    }
}

/// Serve until the listener fails. Blocking.
pub fn serve(addr: &str, ctx: ApiContext) -> Result<()> {
    let server = Server::http(addr).map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
    info!("Listening on http://{}", addr);

    for request in server.incoming_requests() {
        handle(&ctx, request);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use scribe_core::{
        CompletionProvider, EmbeddingProvider, RagResult, ScribeDb, SourceItem, SourceKind,
    };

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn is_configured(&self) -> bool {
            true
        }

        async fn embed(&self, _text: &str) -> RagResult<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn model(&self) -> &str {
            "fixed"
        }
    }

    struct EchoCompleter;

    #[async_trait]
    impl CompletionProvider for EchoCompleter {
        async fn complete(&self, _prompt: &str) -> RagResult<String> {
            Ok("Friday.".to_string())
        }
    }

    fn context(runtime: &tokio::runtime::Runtime, db: &ScribeDb) -> ApiContext {
        let rag = RagService::new(Arc::new(FixedEmbedder), Arc::new(EchoCompleter), db, 6);
        ApiContext {
            rag: Arc::new(rag),
            vectors: db.vectors(),
            runtime: runtime.handle().clone(),
        }
    }

    fn seeded_db() -> ScribeDb {
        let db = ScribeDb::open_in_memory().unwrap();
        let item = db
            .content()
            .put_item(&SourceItem::new(SourceKind::Transcription, "t1", "rec1", "Budget due Friday."))
            .unwrap();
        db.vectors()
            .upsert("t1", SourceKind::Transcription, vec![1.0, 0.0], &item.revision_hash())
            .unwrap();
        db
    }

    #[test]
    fn test_ask_returns_answer_and_citations() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let db = seeded_db();
        let ctx = context(&runtime, &db);

        let (status, body) = route(
            &ctx,
            &Method::Post,
            "/api/rag/ask",
            r#"{"question":"When is the budget due?"}"#,
        );
        assert_eq!(status, 200);
        assert_eq!(body["answer"], "Friday.");
        assert_eq!(body["citations"][0]["sourceId"], "t1");
        assert_eq!(body["citations"][0]["kind"], "transcription");
    }

    #[test]
    fn test_bad_requests() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let db = seeded_db();
        let ctx = context(&runtime, &db);

        assert_eq!(route(&ctx, &Method::Post, "/api/rag/ask", "not json").0, 400);
        assert_eq!(route(&ctx, &Method::Post, "/api/rag/ask", r#"{"question":" "}"#).0, 400);
        assert_eq!(route(&ctx, &Method::Get, "/api/rag/ask", "").0, 405);
        assert_eq!(route(&ctx, &Method::Get, "/nowhere", "").0, 404);
    }

    #[test]
    fn test_stats_route() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let db = seeded_db();
        let ctx = context(&runtime, &db);

        let (status, body) = route(&ctx, &Method::Get, "/api/embeddings/stats?fresh=1", "");
        assert_eq!(status, 200);
        assert_eq!(body["transcriptions"]["embedded"], 1);
        assert_eq!(body["enrichments"]["embedded"], 0);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&RagError::Configuration("no key".into())), 503);
        assert_eq!(status_for(&RagError::upstream_status(500, "down")), 502);
        assert_eq!(status_for(&RagError::Data("dims".into())), 500);
        assert_eq!(status_for(&RagError::InvalidRequest("empty".into())), 400);
    }
}
