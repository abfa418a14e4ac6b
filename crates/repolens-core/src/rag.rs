//! Retrieval-augmented answering.
//!
//! [`ContextAssembler`] retrieves chunks through the [`Index`], builds a
//! single prompt from a fixed preamble, the repository map, the tagged
//! chunks and the question, then makes exactly one [`Generator`] call.
//!
//! # Prompt layout
//!
//! ```text
//! <preamble>
//!
//! REPOSITORY MAP:          (omitted when the map is empty)
//! <map>
//!
//! CONTEXT FROM REPOSITORY:
//! [source: a.py]
//! <chunk text>
//!
//! USER QUESTION:
//! <question>
//!
//! Instructions:
//! - ...
//!
//! Answer:
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::generation::Generator;
use crate::index::Index;
use crate::models::{Answer, Chunk, RetrievalResult};

/// Returned when the generator responds without any text.
pub const NO_ANSWER: &str = "No answer generated";

const PREAMBLE: &str = "You are a Senior Software Engineer assisting with a codebase.
Use the following pieces of retrieved context to answer the question.
If the context doesn't contain the answer, say \"I don't have enough context.\"";

const INSTRUCTIONS: &str = "Instructions:
- Answer specifically using the class names, function names, and variable names found in the context
- Reference file paths when relevant
- If the repository map shows relevant files not in the context, mention them
- Provide code examples when appropriate
- Be precise and technical";

/// Assemble the generation prompt.
pub fn build_prompt(question: &str, repo_map: &str, chunks: &[Chunk]) -> String {
    let mut prompt = String::from(PREAMBLE);

    if !repo_map.trim().is_empty() {
        prompt.push_str("\n\nREPOSITORY MAP:\n");
        prompt.push_str(repo_map);
        prompt.push('\n');
    }

    prompt.push_str("\n\nCONTEXT FROM REPOSITORY:\n");
    let context: Vec<String> = chunks
        .iter()
        .map(|c| format!("[source: {}]\n{}", c.path, c.text))
        .collect();
    prompt.push_str(&context.join("\n\n"));

    prompt.push_str("\n\nUSER QUESTION:\n");
    prompt.push_str(question);
    prompt.push_str("\n\n");
    prompt.push_str(INSTRUCTIONS);
    prompt.push_str("\n\nAnswer:");
    prompt
}

/// Binds an [`Index`], a [`Generator`] and a repository map.
pub struct ContextAssembler {
    index: Arc<Index>,
    generator: Arc<dyn Generator>,
    repo_map: String,
    k: usize,
}

impl ContextAssembler {
    pub fn new(index: Arc<Index>, generator: Arc<dyn Generator>, repo_map: String, k: usize) -> Self {
        Self {
            index,
            generator,
            repo_map,
            k,
        }
    }

    pub fn repo_map(&self) -> &str {
        &self.repo_map
    }

    /// Answer `question`, discarding the retrieval.
    pub async fn ask(&self, question: &str) -> Result<String> {
        Ok(self.ask_with_sources(question).await?.text)
    }

    /// Answer `question` and return the chunks that backed the answer.
    ///
    /// The generator is called once. Its failures become
    /// [`Error::Generation`] and are not retried.
    pub async fn ask_with_sources(&self, question: &str) -> Result<Answer> {
        let sources: RetrievalResult = self.index.query(question, self.k).await?;
        let prompt = build_prompt(question, &self.repo_map, &sources.chunks);
        debug!(
            chunks = sources.len(),
            prompt_bytes = prompt.len(),
            model = self.generator.model_name(),
            "generating answer"
        );

        let text = self
            .generator
            .complete(&prompt)
            .await
            .map_err(Error::generation)?
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| NO_ANSWER.to_string());

        Ok(Answer { text, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::models::Language;
    use crate::search::RetrievalParams;
    use crate::store::memory::InMemoryIndex;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![1.0, t.len() as f32]).collect())
        }
    }

    /// Records prompts and replies with a fixed response.
    struct ScriptedGenerator {
        reply: Option<String>,
        fail: bool,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn replying(reply: Option<&str>) -> Self {
            Self {
                reply: reply.map(str::to_string),
                fail: false,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, prompt: &str) -> anyhow::Result<Option<String>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if self.fail {
                anyhow::bail!("rate limited");
            }
            Ok(self.reply.clone())
        }
    }

    fn chunk(path: &str, text: &str) -> Chunk {
        Chunk {
            id: path.to_string(),
            path: path.to_string(),
            language: Language::Python,
            ordinal: 0,
            start: 0,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    async fn ready_index() -> Arc<Index> {
        let index = Index::new(
            Arc::new(ConstEmbedder),
            Arc::new(InMemoryIndex::new()),
            RetrievalParams::default(),
        );
        index
            .initialize(&[chunk("a.py", "def foo(x): pass"), chunk("b.py", "class Bar: pass")])
            .await
            .unwrap();
        Arc::new(index)
    }

    #[test]
    fn test_prompt_sections_in_order() {
        let prompt = build_prompt(
            "what is foo?",
            "repo/\n  a.py:\n    - def foo(x)",
            &[chunk("a.py", "def foo(x): pass")],
        );
        let map = prompt.find("REPOSITORY MAP:").unwrap();
        let ctx = prompt.find("CONTEXT FROM REPOSITORY:").unwrap();
        let q = prompt.find("USER QUESTION:\nwhat is foo?").unwrap();
        assert!(prompt.starts_with("You are a Senior Software Engineer"));
        assert!(map < ctx && ctx < q);
        assert!(prompt.contains("[source: a.py]\ndef foo(x): pass"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn test_prompt_omits_empty_map() {
        let prompt = build_prompt("q", "  ", &[]);
        assert!(!prompt.contains("REPOSITORY MAP:"));
        assert!(prompt.contains("I don't have enough context."));
    }

    #[tokio::test]
    async fn test_ask_with_sources() {
        let generator = Arc::new(ScriptedGenerator::replying(Some("foo takes x")));
        let assembler =
            ContextAssembler::new(ready_index().await, generator.clone(), "repo/".into(), 8);
        let answer = assembler.ask_with_sources("what is foo").await.unwrap();
        assert_eq!(answer.text, "foo takes x");
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_answer_sentinel() {
        for reply in [None, Some("   ")] {
            let generator = Arc::new(ScriptedGenerator::replying(reply));
            let assembler = ContextAssembler::new(ready_index().await, generator, String::new(), 8);
            assert_eq!(assembler.ask("q").await.unwrap(), NO_ANSWER);
        }
    }

    #[tokio::test]
    async fn test_generation_failure_not_retried() {
        let generator = Arc::new(ScriptedGenerator {
            reply: None,
            fail: true,
            prompts: Mutex::new(Vec::new()),
        });
        let assembler = ContextAssembler::new(ready_index().await, generator.clone(), String::new(), 8);
        let err = assembler.ask("q").await.unwrap_err();
        assert!(matches!(err, Error::Generation(ref m) if m.contains("rate limited")));
        assert_eq!(generator.prompts.lock().unwrap().len(), 1);
    }
}
