//! Ingestion pipeline.
//!
//! Each document walks the lifecycle
//! `uploading → processing → embedding → indexing → complete`; any error
//! after the row exists moves it to `failed` with the message recorded in
//! its metadata. Embedding failures are non-fatal: the document completes
//! with keyword search only and `hrag embed pending` can fill in vectors.
//!
//! Document ids are UUIDv5 over `(owner, filename)`, so re-ingesting a
//! file reprocesses the same document. Unchanged content on a complete
//! document is skipped, and a document already in flight is refused. A
//! failed run drops whatever chunks, vectors, and graph the document had.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use hierarag_core::chunk::chunk_document;
use hierarag_core::graph::{build_document_graph, KnowledgeGraph};
use hierarag_core::models::{clamp_unit, Document, DocumentMetadata, ProcessingStatus};
use hierarag_core::store::{ChunkVectors, Store};
use hierarag_core::text::{sentences, tokens};

use crate::config::Config;
use crate::connector_fs::{self, FileEntry};
use crate::embedding::{create_provider, embed_texts};
use crate::db;
use crate::extract::extract_text;
use crate::migrate::migrate;
use crate::sqlite_store::SqliteStore;

/// Raw input for one document.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
    pub tags: Vec<String>,
}

/// What happened to one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub filename: String,
    pub status: ProcessingStatus,
    pub chunks: usize,
    pub embedded: usize,
    /// Content was unchanged since the last complete run.
    pub skipped: bool,
    pub error: Option<String>,
}

/// Drives documents through the pipeline against any [`Store`].
pub struct Ingestor<S: ?Sized> {
    store: Arc<S>,
    config: Arc<Config>,
    model: Option<String>,
}

impl<S: ?Sized> Clone for Ingestor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            model: self.model.clone(),
        }
    }
}

pub fn document_id(owner_id: &str, filename: &str) -> String {
    let name = format!("{}\n{}", owner_id, filename);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Trim, lowercase, and dedupe tags, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let t = tag.trim().to_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

impl<S: Store + ?Sized + 'static> Ingestor<S> {
    pub fn new(store: Arc<S>, config: Arc<Config>) -> Result<Self> {
        let model = if config.embedding.is_enabled() {
            Some(create_provider(&config.embedding)?.model_name().to_string())
        } else {
            None
        };
        Ok(Self {
            store,
            config,
            model,
        })
    }

    /// Ingest one document. Processing errors are reported in the outcome;
    /// only storage failures and documents already in flight return `Err`.
    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome> {
        let id = document_id(&req.owner_id, &req.filename);
        let hash = content_hash(&req.data);
        let now = chrono::Utc::now().timestamp();
        let existing = self.store.get_document(&id).await?;

        if let Some(prev) = &existing {
            if prev.status == ProcessingStatus::Complete && prev.content_hash == hash {
                tracing::info!(document = %id, filename = %req.filename, "unchanged, skipping");
                let chunks = self.store.document_chunks(&id).await?.len();
                return Ok(IngestOutcome {
                    document_id: id,
                    filename: req.filename,
                    status: ProcessingStatus::Complete,
                    chunks,
                    embedded: 0,
                    skipped: true,
                    error: None,
                });
            }
        }

        let mut doc = Document {
            id: id.clone(),
            owner_id: req.owner_id.clone(),
            filename: req.filename.clone(),
            content_type: req.content_type.clone(),
            size_bytes: req.data.len() as u64,
            status: ProcessingStatus::Uploading,
            metadata: DocumentMetadata {
                tags: normalize_tags(&req.tags),
                ..DocumentMetadata::default()
            },
            body: String::new(),
            created_at: existing.as_ref().map(|d| d.created_at).unwrap_or(now),
            updated_at: now,
            content_hash: hash,
        };
        self.store.claim_document(&doc).await?;
        doc.status = ProcessingStatus::Processing;

        match self.process(&mut doc, &req.data).await {
            Ok((chunks, embedded)) => {
                tracing::info!(document = %id, filename = %doc.filename, chunks, embedded, "document complete");
                Ok(IngestOutcome {
                    document_id: id,
                    filename: req.filename,
                    status: ProcessingStatus::Complete,
                    chunks,
                    embedded,
                    skipped: false,
                    error: None,
                })
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::warn!(document = %id, filename = %doc.filename, error = %message, "document failed");
                self.discard_index(&id).await?;
                self.store
                    .set_status(&id, ProcessingStatus::Failed, Some(&message))
                    .await?;
                Ok(IngestOutcome {
                    document_id: id,
                    filename: req.filename,
                    status: ProcessingStatus::Failed,
                    chunks: 0,
                    embedded: 0,
                    skipped: false,
                    error: Some(message),
                })
            }
        }
    }

    /// Drop chunks, vectors, and graph left over from an earlier run.
    async fn discard_index(&self, id: &str) -> Result<()> {
        self.store.replace_chunks(id, &[], None).await?;
        self.store
            .replace_document_graph(id, &KnowledgeGraph::default())
            .await
    }

    /// Run the stages after `processing` is entered. Returns
    /// `(chunk count, embedded count)`.
    async fn process(&self, doc: &mut Document, data: &[u8]) -> Result<(usize, usize)> {
        let extracted = extract_text(data, &doc.content_type)?;
        let chunks = chunk_document(&doc.id, &extracted.text, &self.config.chunking.options())?;

        doc.metadata.pages = extracted.pages;
        doc.metadata.language = guess_language(&extracted.text).map(str::to_string);
        doc.metadata.complexity_score = complexity_score(&extracted.text);
        doc.body = extracted.text;
        self.store.upsert_document(doc).await?;

        self.advance(doc, ProcessingStatus::Embedding).await?;
        let vectors = match &self.model {
            Some(_) => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                match embed_texts(&self.config.embedding, &texts).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        tracing::warn!(document = %doc.id, error = %e, "embedding failed, continuing without vectors");
                        None
                    }
                }
            }
            None => None,
        };

        self.advance(doc, ProcessingStatus::Indexing).await?;
        let chunk_vectors = match (&self.model, &vectors) {
            (Some(model), Some(v)) => Some(ChunkVectors {
                model: model.as_str(),
                vectors: v.as_slice(),
            }),
            _ => None,
        };
        self.store
            .replace_chunks(&doc.id, &chunks, chunk_vectors)
            .await?;
        let graph = build_document_graph(&doc.id, &chunks, &self.config.graph);
        tracing::debug!(
            document = %doc.id,
            entities = graph.entity_count(),
            relationships = graph.relationship_count(),
            "built knowledge graph"
        );
        self.store.replace_document_graph(&doc.id, &graph).await?;

        self.advance(doc, ProcessingStatus::Complete).await?;
        Ok((chunks.len(), vectors.map(|v| v.len()).unwrap_or(0)))
    }

    async fn advance(&self, doc: &mut Document, next: ProcessingStatus) -> Result<()> {
        self.store.set_status(&doc.id, next, None).await?;
        doc.status = next;
        Ok(())
    }

    /// Ingest scanned files with at most `ingest.max_concurrent` in flight.
    /// Results come back in scan order.
    pub async fn ingest_files(
        &self,
        files: Vec<FileEntry>,
        owner_id: &str,
        tags: &[String],
    ) -> Vec<IngestOutcome> {
        let permits = Arc::new(Semaphore::new(self.config.ingest.max_concurrent.max(1)));
        let mut set = JoinSet::new();

        for (idx, file) in files.into_iter().enumerate() {
            let this = self.clone();
            let permits = Arc::clone(&permits);
            let owner_id = owner_id.to_string();
            let tags = tags.to_vec();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = this.ingest_file(file, owner_id, tags).await;
                (idx, outcome)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => tracing::error!(error = %e, "ingest task panicked"),
            }
        }
        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, o)| o).collect()
    }

    async fn ingest_file(&self, file: FileEntry, owner_id: String, tags: Vec<String>) -> IngestOutcome {
        let filename = file.relative.clone();
        let result = match tokio::fs::read(&file.path).await {
            Ok(data) => {
                self.ingest(IngestRequest {
                    owner_id: owner_id.clone(),
                    filename: filename.clone(),
                    content_type: file.content_type.to_string(),
                    data,
                    tags,
                })
                .await
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("reading {}", file.path.display()))),
        };
        result.unwrap_or_else(|e| IngestOutcome {
            document_id: document_id(&owner_id, &filename),
            filename,
            status: ProcessingStatus::Failed,
            chunks: 0,
            embedded: 0,
            skipped: false,
            error: Some(format!("{:#}", e)),
        })
    }

    /// Scan `root` and ingest everything it selects.
    pub async fn ingest_path(
        &self,
        root: &Path,
        owner_id: &str,
        tags: &[String],
    ) -> Result<Vec<IngestOutcome>> {
        let files = connector_fs::scan(root, &self.config.ingest)?;
        Ok(self.ingest_files(files, owner_id, tags).await)
    }
}

/// CLI entry point: ingest a file or directory and print one line per document.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    owner_id: Option<&str>,
    tags: &[String],
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));
    let owner = owner_id.unwrap_or(config.ingest.default_owner.as_str()).to_string();

    let ingestor = Ingestor::new(Arc::clone(&store), Arc::new(config.clone()))?;
    let outcomes = ingestor.ingest_path(path, &owner, tags).await;
    store.close().await;
    let outcomes = outcomes?;

    if outcomes.is_empty() {
        println!("No supported files found under {}", path.display());
        return Ok(());
    }

    let mut failed = 0;
    for o in &outcomes {
        match (&o.error, o.skipped) {
            (Some(err), _) => {
                failed += 1;
                println!("  FAILED    {}  {}", o.filename, err);
            }
            (None, true) => println!("  unchanged {}  ({})", o.filename, o.document_id),
            (None, false) => println!(
                "  {:<9} {}  ({}, {} chunks, {} embedded)",
                o.status.as_str(),
                o.filename,
                o.document_id,
                o.chunks,
                o.embedded
            ),
        }
    }
    println!();
    println!(
        "ingest: {} documents, {} failed",
        outcomes.len(),
        failed
    );
    Ok(())
}

const STOPWORDS_EN: &[&str] = &[
    "the", "and", "of", "to", "in", "is", "that", "it", "for", "with", "as", "are", "this", "on",
    "be", "by", "was", "from",
];
const STOPWORDS_ES: &[&str] = &[
    "el", "la", "los", "las", "de", "que", "y", "en", "un", "una", "es", "por", "para", "con",
    "del", "se",
];
const STOPWORDS_FR: &[&str] = &[
    "le", "la", "les", "de", "des", "et", "est", "un", "une", "du", "que", "pour", "dans", "sur",
    "pas", "au",
];
const STOPWORDS_DE: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "zu", "den", "mit", "von", "sich",
    "auf", "dem", "im",
];

const MIN_LANGUAGE_TOKENS: usize = 5;
const MIN_STOPWORD_RATIO: f64 = 0.05;

/// Guess the language from stopword frequency. `None` when the text is too
/// short or no language clears the threshold.
pub fn guess_language(text: &str) -> Option<&'static str> {
    let toks = tokens(text);
    if toks.len() < MIN_LANGUAGE_TOKENS {
        return None;
    }
    let candidates = [
        ("en", STOPWORDS_EN),
        ("es", STOPWORDS_ES),
        ("fr", STOPWORDS_FR),
        ("de", STOPWORDS_DE),
    ];
    let mut best: Option<(&'static str, f64)> = None;
    for (lang, words) in candidates {
        let hits = toks.iter().filter(|t| words.contains(&t.as_str())).count();
        let ratio = hits as f64 / toks.len() as f64;
        if ratio >= MIN_STOPWORD_RATIO && best.map_or(true, |(_, r)| ratio > r) {
            best = Some((lang, ratio));
        }
    }
    best.map(|(lang, _)| lang)
}

/// Readability proxy in `[0, 1]` from sentence length and long-word share.
///
/// `0.5·min(avg_sentence_words / 40, 1) + 0.5·min(long_word_ratio·2, 1)`,
/// where a long word has more than six characters.
pub fn complexity_score(text: &str) -> f64 {
    let sents = sentences(text);
    let toks = tokens(text);
    if sents.is_empty() || toks.is_empty() {
        return 0.0;
    }
    let avg_words = toks.len() as f64 / sents.len() as f64;
    let long = toks.iter().filter(|t| t.chars().count() > 6).count() as f64 / toks.len() as f64;
    clamp_unit(0.5 * (avg_words / 40.0).min(1.0) + 0.5 * (long * 2.0).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::extract::MIME_MARKDOWN;
    use hierarag_core::store::{InMemoryStore, SearchFilter};
    use hierarag_core::RagError;

    fn config() -> Arc<Config> {
        let mut config = crate::config::parse_config(
            r#"
            [db]
            path = "unused.sqlite"

            [embedding]
            provider = "hash"
            dims = 64

            [chunking]
            max_tokens = 16
            overlap_tokens = 4
            parent_max_tokens = 64
            min_tokens = 4
            "#,
        )
        .unwrap();
        config.graph.min_entity_mentions = 1;
        Arc::new(config)
    }

    fn request(filename: &str, body: &str) -> IngestRequest {
        IngestRequest {
            owner_id: "alice".into(),
            filename: filename.into(),
            content_type: MIME_MARKDOWN.into(),
            data: body.as_bytes().to_vec(),
            tags: vec![" Databases ".into(), "databases".into(), "ML".into()],
        }
    }

    const BODY: &str = "GraphRAG uses PostgreSQL for storage. The index is rebuilt nightly.\n\n\
        Hybrid search combines keyword scores with vector similarity.";

    #[tokio::test]
    async fn test_ingest_completes_with_metadata_and_vectors() {
        let store = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), config()).unwrap();

        let outcome = ingestor.ingest(request("notes.md", BODY)).await.unwrap();
        assert_eq!(outcome.status, ProcessingStatus::Complete);
        assert!(outcome.chunks > 0);
        assert_eq!(outcome.embedded, outcome.chunks);

        let doc = store.get_document(&outcome.document_id).await.unwrap().unwrap();
        assert_eq!(doc.status, ProcessingStatus::Complete);
        assert_eq!(doc.metadata.tags, vec!["databases".to_string(), "ml".to_string()]);
        assert_eq!(doc.metadata.language.as_deref(), Some("en"));
        assert!(doc.metadata.complexity_score > 0.0);
        assert_eq!(doc.body, BODY);

        let graph = store.load_graph(Some(&outcome.document_id)).await.unwrap();
        assert!(graph.entity_by_name("PostgreSQL").is_some());
    }

    #[tokio::test]
    async fn test_reingest_skips_unchanged_and_reprocesses_changed() {
        let store = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), config()).unwrap();

        let first = ingestor.ingest(request("notes.md", BODY)).await.unwrap();
        let again = ingestor.ingest(request("notes.md", BODY)).await.unwrap();
        assert!(again.skipped);
        assert_eq!(again.document_id, first.document_id);
        assert_eq!(again.chunks, first.chunks);

        let changed = ingestor
            .ingest(request("notes.md", "Completely different text about compilers."))
            .await
            .unwrap();
        assert!(!changed.skipped);
        assert_eq!(changed.document_id, first.document_id);
        assert_eq!(store.list_documents(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_marks_document_failed() {
        let store = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), config()).unwrap();

        let mut req = request("broken.pdf", "not really a pdf");
        req.content_type = crate::extract::MIME_PDF.into();
        let outcome = ingestor.ingest(req).await.unwrap();
        assert_eq!(outcome.status, ProcessingStatus::Failed);
        assert!(outcome.error.as_deref().unwrap_or("").contains("PDF"));

        let summary = store
            .get_document_summary(&outcome.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, ProcessingStatus::Failed);
        assert!(summary.metadata.error.is_some());
    }

    #[tokio::test]
    async fn test_failed_reingest_drops_previous_index() {
        let store = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), config()).unwrap();
        let first = ingestor.ingest(request("notes.md", BODY)).await.unwrap();
        assert!(first.chunks > 0);

        let mut broken = request("notes.md", "not really a pdf");
        broken.content_type = crate::extract::MIME_PDF.into();
        let outcome = ingestor.ingest(broken).await.unwrap();
        assert_eq!(outcome.status, ProcessingStatus::Failed);
        assert_eq!(outcome.document_id, first.document_id);

        let id = outcome.document_id.as_str();
        assert!(store.document_chunks(id).await.unwrap().is_empty());
        assert!(store.load_graph(Some(id)).await.unwrap().is_empty());
        assert!(store.load_graph(None).await.unwrap().entity_by_name("PostgreSQL").is_none());
        let hits = store
            .keyword_search("postgresql", 10, &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_refuses_document_in_flight() {
        let store = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), config()).unwrap();
        let first = ingestor.ingest(request("notes.md", BODY)).await.unwrap();
        let id = first.document_id.as_str();
        store
            .set_status(id, ProcessingStatus::Processing, None)
            .await
            .unwrap();

        for body in [BODY, "Another revision about compilers."] {
            let err = ingestor.ingest(request("notes.md", body)).await.unwrap_err();
            assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::InvalidInput(_))));
        }
        let doc = store.get_document(id).await.unwrap().unwrap();
        assert_eq!(doc.status, ProcessingStatus::Processing);
        assert_eq!(doc.body, BODY);
        assert_eq!(store.document_chunks(id).await.unwrap().len(), first.chunks);
    }

    #[tokio::test]
    async fn test_ingest_path_keeps_scan_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.md", "a.md", "b.txt"] {
            std::fs::write(dir.path().join(name), format!("Document {} talks about search.", name)).unwrap();
        }
        let store = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(Arc::clone(&store), config()).unwrap();

        let outcomes = ingestor.ingest_path(dir.path(), "bob", &[]).await.unwrap();
        let names: Vec<&str> = outcomes.iter().map(|o| o.filename.as_str()).collect();
        assert_eq!(names, vec!["a.md", "b.txt", "c.md"]);
        assert!(outcomes.iter().all(|o| o.status == ProcessingStatus::Complete));
        assert_eq!(store.list_documents(Some("bob")).await.unwrap().len(), 3);
    }

    #[test]
    fn test_guess_language() {
        assert_eq!(
            guess_language("The cat sat on the mat and it was happy with the view."),
            Some("en")
        );
        assert_eq!(
            guess_language("El perro y la casa de los abuelos es muy grande para una familia."),
            Some("es")
        );
        assert_eq!(
            guess_language("Der Hund und die Katze sind nicht im Haus mit dem Vater."),
            Some("de")
        );
        assert_eq!(guess_language("tiny"), None);
        assert_eq!(guess_language("qwerty zxcvb asdfg hjkl uiop"), None);
    }

    #[test]
    fn test_complexity_score() {
        assert_eq!(complexity_score(""), 0.0);
        let simple = complexity_score("A cat. A dog. A pig.");
        let dense = complexity_score(
            "Heterogeneous distributed architectures necessitate sophisticated \
             synchronization methodologies throughout implementation lifecycles.",
        );
        assert!(simple < dense);
        assert!((0.0..=1.0).contains(&dense));
    }

    #[test]
    fn test_document_id_is_stable_per_owner_and_name() {
        assert_eq!(document_id("a", "x.md"), document_id("a", "x.md"));
        assert_ne!(document_id("a", "x.md"), document_id("b", "x.md"));
    }
}
