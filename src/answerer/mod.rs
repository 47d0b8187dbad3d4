//! Grounded answer generation over retrieved chunks.
//!
//! The answerer renders retrieved evidence into a context block, wraps it
//! in a prompt that forbids answering beyond that evidence, and hands the
//! prompt to a chat completion provider. With no evidence at all it skips
//! the provider entirely and returns a fixed refusal.

use anyhow::Result;

use crate::retriever::RetrievalHit;

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Returned without calling any provider when retrieval found nothing.
pub const NO_EVIDENCE_ANSWER: &str =
    "該当する情報が見つかりませんでした。質問を言い換えてお試しください。";

/// One chat completion request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// System-level instruction.
    pub system: String,
    /// User turn content.
    pub user: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
}

/// A chat completion backend.
pub trait AnswerProvider: Send + Sync {
    /// Provider label for logs.
    fn name(&self) -> &str;

    /// Runs one completion and returns the assistant text.
    fn complete(&self, request: &ProviderRequest) -> Result<String>;
}

/// Knobs for prompt construction and sampling.
#[derive(Debug, Clone)]
pub struct AnswererConfig {
    /// Excerpt cap per retrieved chunk, in characters.
    pub max_chars_per_hit: usize,
    /// Sampling temperature; kept low so answers stay extractive.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: u32,
}

impl Default for AnswererConfig {
    fn default() -> Self {
        Self {
            max_chars_per_hit: 400,
            temperature: 0.1,
            max_tokens: 1000,
        }
    }
}

const SYSTEM_PROMPT: &str = "\
あなたは大学の履修・学則に関する質問に答えるアシスタントです。\
以下のルールを厳守してください:\n\
1. 提供された資料の内容だけに基づいて回答する。\n\
2. 資料に書かれていないことは推測せず、「資料には記載がありません」と答える。\n\
3. 科目について回答するときは、必ずシラバスのURLがあれば案内する。\n\
4. 回答は簡潔に、根拠となる資料名を添える。";

/// Renders `hits` into the evidence block shown to the model.
///
/// Each hit becomes a numbered block with its source label, course
/// metadata when present, the syllabus URL when known, and an excerpt
/// capped at the configured character count.
pub fn render_context(config: &AnswererConfig, hits: &[RetrievalHit]) -> String {
    let mut out = String::new();
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("[資料{}] 出典: {}\n", i + 1, hit.source));
        let meta = &hit.chunk.metadata;
        if let Some(title) = &meta.title {
            out.push_str(&format!("科目名: {title}\n"));
        }
        if let Some(instructor) = &meta.instructor {
            out.push_str(&format!("担当教員: {instructor}\n"));
        }
        if let Some(schedule) = &meta.schedule {
            out.push_str(&format!("学期曜日時限: {schedule}\n"));
        }
        if let Some(url) = &meta.url {
            out.push_str(&format!("シラバスURL: {url}\n"));
        }
        let excerpt: String = hit
            .chunk
            .text
            .chars()
            .take(config.max_chars_per_hit)
            .collect();
        out.push_str(&excerpt);
        out.push_str("\n\n");
    }
    out.trim_end().to_string()
}

/// Generates grounded answers through a pluggable provider.
pub struct Answerer {
    provider: Box<dyn AnswerProvider>,
    config: AnswererConfig,
}

impl Answerer {
    /// Builds an answerer over `provider`.
    pub fn new(provider: Box<dyn AnswerProvider>, config: AnswererConfig) -> Self {
        Self { provider, config }
    }

    /// The provider label, for logging.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Renders `hits` into the evidence block shown to the model.
    pub fn render_context(&self, hits: &[RetrievalHit]) -> String {
        render_context(&self.config, hits)
    }

    /// Builds the full provider request for `question` over `hits`.
    fn build_request(&self, question: &str, hits: &[RetrievalHit]) -> ProviderRequest {
        let context = self.render_context(hits);
        let user = format!("## 参考資料\n{context}\n\n## 質問\n{question}");
        ProviderRequest {
            system: SYSTEM_PROMPT.to_string(),
            user,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Answers `question` grounded in `hits`. Empty evidence short-circuits
    /// to [`NO_EVIDENCE_ANSWER`] without any provider call.
    pub fn answer(&self, question: &str, hits: &[RetrievalHit]) -> Result<String> {
        if hits.is_empty() {
            return Ok(NO_EVIDENCE_ANSWER.to_string());
        }
        let request = self.build_request(question, hits);
        self.provider.complete(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, ChunkMetadata};

    struct EchoProvider;

    impl AnswerProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn complete(&self, request: &ProviderRequest) -> Result<String> {
            Ok(request.user.clone())
        }
    }

    fn hit(text: &str, url: Option<&str>) -> RetrievalHit {
        RetrievalHit {
            source: "courses".to_string(),
            score: 0.9,
            calibrated: 0.9,
            chunk: Chunk {
                document_id: "course-0".to_string(),
                sequence_index: 0,
                text: text.to_string(),
                metadata: ChunkMetadata {
                    title: Some("憲法I".to_string()),
                    instructor: Some("山田 太郎".to_string()),
                    schedule: Some("春学期 月3".to_string()),
                    campus: Some("早稲田".to_string()),
                    source_file: Some("courses.csv".to_string()),
                    url: url.map(str::to_string),
                },
            },
        }
    }

    fn answerer() -> Answerer {
        Answerer::new(Box::new(EchoProvider), AnswererConfig::default())
    }

    #[test]
    fn empty_hits_short_circuit_without_provider_call() {
        struct PanicProvider;
        impl AnswerProvider for PanicProvider {
            fn name(&self) -> &str {
                "panic"
            }
            fn complete(&self, _request: &ProviderRequest) -> Result<String> {
                panic!("provider must not be called without evidence");
            }
        }
        let answerer = Answerer::new(Box::new(PanicProvider), AnswererConfig::default());
        let answer = answerer.answer("成績評価は?", &[]).unwrap();
        assert_eq!(answer, NO_EVIDENCE_ANSWER);
    }

    #[test]
    fn context_includes_metadata_and_url() {
        let hits = vec![hit(
            "成績評価はレポートと期末試験による。",
            Some("https://example.ac.jp/syllabus/101"),
        )];
        let context = answerer().render_context(&hits);
        assert!(context.contains("[資料1] 出典: courses"));
        assert!(context.contains("科目名: 憲法I"));
        assert!(context.contains("担当教員: 山田 太郎"));
        assert!(context.contains("シラバスURL: https://example.ac.jp/syllabus/101"));
        assert!(context.contains("成績評価はレポート"));
    }

    #[test]
    fn excerpt_is_capped_per_hit() {
        let long = "あ".repeat(1000);
        let hits = vec![hit(&long, None)];
        let context = answerer().render_context(&hits);
        assert!(context.contains(&"あ".repeat(400)));
        assert!(!context.contains(&"あ".repeat(401)));
    }

    #[test]
    fn request_carries_question_and_context() {
        let hits = vec![hit("教科書は指定なし。", None)];
        let answer = answerer().answer("教科書は?", &hits).unwrap();
        assert!(answer.contains("## 参考資料"));
        assert!(answer.contains("教科書は指定なし。"));
        assert!(answer.contains("## 質問\n教科書は?"));
    }
}
