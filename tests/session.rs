use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use repolens::config::{Config, IndexConfig, RepoConfig};
use repolens::session::{IndexOutcome, Session, SessionState};
use repolens::sqlite_index::SqliteIndex;
use repolens_core::embedding::Embedder;
use repolens_core::generation::Generator;
use repolens_core::rag::NO_ANSWER;
use repolens_core::store::memory::InMemoryIndex;
use repolens_core::store::SimilarityIndex;
use repolens_core::Error;

/// Letter-frequency vectors; deterministic and network-free.
struct FakeEmbedder {
    model: String,
    texts_embedded: AtomicUsize,
}

impl FakeEmbedder {
    fn new(model: &str) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_string(),
            texts_embedded: AtomicUsize::new(0),
        })
    }

    fn embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 27];
                v[26] = 1.0;
                for b in t.bytes().filter(u8::is_ascii_lowercase) {
                    v[(b - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Answers with a fixed string, or fails every call.
struct FakeGenerator {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    fn model_name(&self) -> &str {
        "fake-llm"
    }

    async fn complete(&self, prompt: &str) -> anyhow::Result<Option<String>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Some(reply) => Ok(Some(reply.clone())),
            None => anyhow::bail!("model overloaded"),
        }
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn setup_repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "repo/a.py", "def foo(x): pass\n");
    write(
        tmp.path(),
        "repo/auth/tokens.py",
        "import hashlib\n\nclass TokenStore:\n    def issue(self, user_id):\n        return hashlib.sha256(str(user_id).encode()).hexdigest()\n",
    );
    tmp
}

fn config_for(tmp: &TempDir, extensions: &[&str]) -> Config {
    Config {
        repo: RepoConfig {
            root: tmp.path().join("repo"),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            ..RepoConfig::default()
        },
        index: IndexConfig {
            path: tmp.path().join("db"),
        },
        ..Config::default()
    }
}

fn exts(list: &[&str]) -> Vec<String> {
    list.iter().map(|e| e.to_string()).collect()
}

fn session_with(
    tmp: &TempDir,
    embedder: Arc<FakeEmbedder>,
    generator: Arc<FakeGenerator>,
    store: Arc<dyn SimilarityIndex>,
) -> Session {
    Session::new(config_for(tmp, &[".py"]), embedder, generator, store).unwrap()
}

#[tokio::test]
async fn test_structure_map_mentions_function_and_parameter() {
    let tmp = setup_repo();
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("ok"),
        Arc::new(InMemoryIndex::new()),
    );
    session.index(&exts(&[".py"]), false).await.unwrap();

    let map = session.structure_map().unwrap();
    assert!(map.starts_with("REPOSITORY STRUCTURE:"));
    assert!(map.lines().any(|l| l.contains("foo") && l.contains('x')));
    assert!(map.contains("- class TokenStore"));
}

#[tokio::test]
async fn test_unmatched_extension_is_no_documents() {
    let tmp = setup_repo();
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("ok"),
        Arc::new(InMemoryIndex::new()),
    );
    let err = session.index(&exts(&[".go"]), false).await.unwrap_err();
    assert!(matches!(err, Error::NoDocuments { .. }));
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn test_unsupported_extension_is_no_documents() {
    let tmp = setup_repo();
    write(tmp.path(), "repo/README.md", "# readme\n");
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("ok"),
        Arc::new(InMemoryIndex::new()),
    );
    let err = session.index(&exts(&[".md"]), true).await.unwrap_err();
    assert!(matches!(err, Error::NoDocuments { .. }));
}

#[tokio::test]
async fn test_ask_before_index_is_not_ready() {
    let tmp = setup_repo();
    let session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("ok"),
        Arc::new(InMemoryIndex::new()),
    );
    let err = session.ask("what is foo", false).await.unwrap_err();
    assert!(matches!(err, Error::NotReady));
}

#[tokio::test]
async fn test_missing_repo_is_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let mut session = Session::new(
        config_for(&tmp, &[".py"]),
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("ok"),
        Arc::new(InMemoryIndex::new()),
    )
    .unwrap();
    let err = session.index(&exts(&[".py"]), false).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn test_interactive_loop_script() {
    let tmp = setup_repo();
    let generator = FakeGenerator::replying("foo takes one argument, x.");
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        generator.clone(),
        Arc::new(InMemoryIndex::new()),
    );
    session.index(&exts(&[".py"]), false).await.unwrap();

    let input: &[u8] = b"sources\nwhat is foo\nexit\nnever asked\n";
    let mut out = Vec::new();
    let summary = session
        .run_loop(input, &mut out, std::future::pending::<()>(), false)
        .await
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    assert!(session.show_sources());
    assert_eq!(summary.questions, 1);
    assert_eq!(summary.errors, 0);
    assert!(text.contains("Source documents: ON"));
    assert!(text.contains("foo takes one argument, x."));
    assert!(text.contains("] a.py"));
    assert!(!text.contains("You:"));
    assert_eq!(generator.prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_loop_survives_failed_question() {
    let tmp = setup_repo();
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::failing(),
        Arc::new(InMemoryIndex::new()),
    );
    session.index(&exts(&[".py"]), false).await.unwrap();

    let input: &[u8] = b"first?\n\n   \nsecond?\nsources\nsources\n";
    let mut out = Vec::new();
    let summary = session
        .run_loop(input, &mut out, std::future::pending::<()>(), false)
        .await
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    assert_eq!(summary.questions, 2);
    assert_eq!(summary.errors, 2);
    assert!(!session.show_sources());
    assert!(text.contains("Error: generation failed: model overloaded"));
    assert!(text.contains("Source documents: OFF"));
}

#[tokio::test]
async fn test_loop_reports_undecodable_line_and_continues() {
    let tmp = setup_repo();
    let generator = FakeGenerator::replying("foo takes one argument, x.");
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        generator.clone(),
        Arc::new(InMemoryIndex::new()),
    );
    session.index(&exts(&[".py"]), false).await.unwrap();

    let input: &[u8] = b"caf\xe9?\nwhat is foo\nexit\n";
    let mut out = Vec::new();
    let summary = session
        .run_loop(input, &mut out, std::future::pending::<()>(), false)
        .await
        .unwrap();

    let text = String::from_utf8(out).unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.questions, 1);
    assert!(text.contains("Error: input is not valid UTF-8"), "{}", text);
    assert!(text.contains("foo takes one argument, x."));
    assert!(text.contains("Goodbye!"));
    assert_eq!(generator.prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_sources_toggle_lives_on_session() {
    let tmp = setup_repo();
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("ok"),
        Arc::new(InMemoryIndex::new()),
    );
    assert!(!session.show_sources());
    session.index(&exts(&[".py"]), false).await.unwrap();

    let input: &[u8] = b"sources\n";
    let mut out = Vec::new();
    session
        .run_loop(input, &mut out, std::future::pending::<()>(), false)
        .await
        .unwrap();
    assert!(session.is_ready());
    assert!(session.show_sources());

    // A second loop starts from the toggle left by the first.
    let input: &[u8] = b"what is foo\n";
    let mut out = Vec::new();
    session
        .run_loop(input, &mut out, std::future::pending::<()>(), false)
        .await
        .unwrap();
    assert!(String::from_utf8(out).unwrap().contains("Sources:"));

    assert!(!session.toggle_sources());
    session.set_show_sources(true);
    assert!(session.show_sources());
}

#[tokio::test]
async fn test_interrupt_ends_loop_with_farewell() {
    let tmp = setup_repo();
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("ok"),
        Arc::new(InMemoryIndex::new()),
    );

    // The writer half stays open, so reading never completes.
    let (_writer, reader) = tokio::io::duplex(64);
    let mut out = Vec::new();
    let summary = session
        .run_loop(tokio::io::BufReader::new(reader), &mut out, async {}, false)
        .await
        .unwrap();

    assert_eq!(summary.questions, 0);
    assert!(String::from_utf8(out).unwrap().contains("Goodbye!"));
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn test_second_index_loads_without_parsing() {
    let tmp = setup_repo();
    let store: Arc<InMemoryIndex> = Arc::new(InMemoryIndex::new());

    let first_embedder = FakeEmbedder::new("fake");
    let mut first = session_with(&tmp, first_embedder.clone(), FakeGenerator::replying("ok"), store.clone());
    let outcome = first.index(&exts(&[".py"]), false).await.unwrap();
    assert!(matches!(outcome, IndexOutcome::Rebuilt { files: 2, .. }));
    assert!(first_embedder.embedded() > 0);

    let second_embedder = FakeEmbedder::new("fake");
    let mut second = session_with(&tmp, second_embedder.clone(), FakeGenerator::replying("ok"), store);
    let outcome = second.index(&exts(&[".py"]), false).await.unwrap();
    assert!(matches!(outcome, IndexOutcome::Loaded));
    assert!(second.is_ready());
    assert_eq!(second_embedder.embedded(), 0);

    // Re-indexing a ready session keeps it ready.
    let outcome = second.index(&exts(&[".py"]), true).await.unwrap();
    assert!(matches!(outcome, IndexOutcome::Rebuilt { .. }));
    assert!(second.is_ready());
}

#[tokio::test]
async fn test_no_answer_sentinel_reaches_caller() {
    let tmp = setup_repo();
    let mut session = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("   "),
        Arc::new(InMemoryIndex::new()),
    );
    session.index(&exts(&[".py"]), false).await.unwrap();
    let answer = session.ask("anything", true).await.unwrap();
    assert_eq!(answer.text, NO_ANSWER);
    assert!(!answer.sources.is_empty());
}

#[tokio::test]
async fn test_sqlite_index_persists_between_sessions() {
    let tmp = setup_repo();
    let db_dir = tmp.path().join("db");

    let mut first = session_with(
        &tmp,
        FakeEmbedder::new("fake"),
        FakeGenerator::replying("ok"),
        Arc::new(SqliteIndex::new(&db_dir)),
    );
    assert!(matches!(
        first.index(&exts(&[".py"]), false).await.unwrap(),
        IndexOutcome::Rebuilt { .. }
    ));
    let answer = first.ask("what does foo take", true).await.unwrap();
    assert_eq!(answer.text, "ok");
    drop(first);

    let embedder = FakeEmbedder::new("fake");
    let mut second = session_with(
        &tmp,
        embedder.clone(),
        FakeGenerator::replying("ok"),
        Arc::new(SqliteIndex::new(&db_dir)),
    );
    assert!(matches!(
        second.index(&exts(&[".py"]), false).await.unwrap(),
        IndexOutcome::Loaded
    ));
    assert_eq!(embedder.embedded(), 0);
    let answer = second.ask("what does foo take", true).await.unwrap();
    assert!(answer.sources.iter().any(|s| s.path == "a.py"));
}

#[tokio::test]
async fn test_sqlite_model_change_forces_rebuild() {
    let tmp = setup_repo();
    let db_dir = tmp.path().join("db");

    let mut first = session_with(
        &tmp,
        FakeEmbedder::new("model-a"),
        FakeGenerator::replying("ok"),
        Arc::new(SqliteIndex::new(&db_dir)),
    );
    first.index(&exts(&[".py"]), false).await.unwrap();
    drop(first);

    let mut second = session_with(
        &tmp,
        FakeEmbedder::new("model-b"),
        FakeGenerator::replying("ok"),
        Arc::new(SqliteIndex::new(&db_dir)),
    );
    assert!(matches!(
        second.index(&exts(&[".py"]), false).await.unwrap(),
        IndexOutcome::Rebuilt { .. }
    ));
}
