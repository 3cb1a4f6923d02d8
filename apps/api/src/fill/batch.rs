//! Batch fill — resolves every field of a form independently.
//!
//! Flow per field: constant-backed matching (exact → semantic → pattern), then, for the
//! fields still unresolved and only if the caller opted in, generative completion.
//! A field never goes back to an earlier stage once a later one has been consulted.
//!
//! Matching runs concurrently per field. Generative calls run concurrently too, bounded
//! by a semaphore so a large form cannot blow through provider rate limits.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::llm_client::{LlmError, Usage};
use crate::matcher::generative::{FieldContext, GeneratedAnswer, GenerativeFallback};
use crate::matcher::{FieldDescriptor, FieldMatcher, MatchResult, MatchSource};

#[derive(Debug, Error)]
pub enum FillError {
    #[error("No constant matched and generative fallback is not configured")]
    GenerationDisabled,

    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),
}

/// Which stages a batch may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Constants first, generative fallback for the rest.
    #[default]
    Full,
    /// Constants only; unresolved fields are left out.
    ConstantsOnly,
    /// Skip constants and generate every field.
    GenerativeOnly,
}

/// Per-batch counts. Every field lands in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillMetadata {
    /// Exact and pattern matches.
    pub constant_matches: usize,
    pub semantic_matches: usize,
    pub llm_matches: usize,
    pub unmatched: usize,
    pub total_fields: usize,
}

/// Token usage summed over a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub request_count: u32,
}

impl UsageTotals {
    fn add(&mut self, usage: Usage) {
        self.input_tokens += u64::from(usage.input_tokens);
        self.output_tokens += u64::from(usage.output_tokens);
        self.request_count += 1;
    }
}

/// Result of a batch: answers keyed by field id, plus accounting.
/// Unresolved fields are absent from `fields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillOutcome {
    pub fields: BTreeMap<String, String>,
    pub metadata: FillMetadata,
    pub usage: UsageTotals,
}

#[derive(Debug, Clone)]
enum Resolution {
    Constant(String),
    Semantic(String),
    Generated(GeneratedAnswer),
    Unmatched,
}

impl Resolution {
    fn from_match(result: MatchResult) -> Self {
        match result {
            MatchResult::Found {
                value,
                source: MatchSource::Semantic,
                ..
            } => Resolution::Semantic(value),
            MatchResult::Found { value, .. } => Resolution::Constant(value),
            MatchResult::Miss { .. } => Resolution::Unmatched,
        }
    }
}

/// The field-filling service: constant matcher plus optional generative fallback.
#[derive(Clone)]
pub struct AutofillEngine {
    matcher: FieldMatcher,
    generator: Option<GenerativeFallback>,
    llm_concurrency: usize,
}

impl AutofillEngine {
    pub fn new(
        matcher: FieldMatcher,
        generator: Option<GenerativeFallback>,
        llm_concurrency: usize,
    ) -> Self {
        Self {
            matcher,
            generator,
            llm_concurrency: llm_concurrency.max(1),
        }
    }

    pub fn generation_enabled(&self) -> bool {
        self.generator.is_some()
    }

    /// Constant-backed matching for one field; never calls the text model.
    pub async fn match_field(
        &self,
        label: &str,
        name: &str,
        placeholder: &str,
        context: &FieldContext,
    ) -> MatchResult {
        self.matcher
            .match_field(label, name, placeholder, &context.constants)
            .await
    }

    /// Answers one field, escalating to the text model when no constant matches.
    pub async fn fill_field_with_fallback(
        &self,
        field: &FieldDescriptor,
        context: &FieldContext,
    ) -> Result<String, FillError> {
        let result = self
            .match_field(&field.label, &field.name, &field.placeholder, context)
            .await;
        if let MatchResult::Found { value, .. } = result {
            return Ok(value);
        }

        let generator = self.generator.as_ref().ok_or(FillError::GenerationDisabled)?;
        Ok(generator.fill(field, context).await?.value)
    }

    /// Fills a whole form. Per-field failures are logged and counted as unmatched;
    /// they never abort the batch.
    pub async fn batch_fill(
        &self,
        fields: Vec<FieldDescriptor>,
        context: &FieldContext,
        mode: FillMode,
    ) -> FillOutcome {
        let span = info_span!("fill", request_id = %Uuid::new_v4(), fields = fields.len(), ?mode);
        self.run_batch(fields, context, mode).instrument(span).await
    }

    async fn run_batch(
        &self,
        fields: Vec<FieldDescriptor>,
        context: &FieldContext,
        mode: FillMode,
    ) -> FillOutcome {
        let fields = Arc::new(fields);
        let mut resolutions = vec![Resolution::Unmatched; fields.len()];

        if mode != FillMode::GenerativeOnly {
            info!("Matching {} fields with constants...", fields.len());
            self.match_all(&fields, context, &mut resolutions).await;
        }

        let pending: Vec<usize> = resolutions
            .iter()
            .enumerate()
            .filter(|(_, r)| matches!(r, Resolution::Unmatched))
            .map(|(i, _)| i)
            .collect();

        if mode != FillMode::ConstantsOnly && !pending.is_empty() {
            match &self.generator {
                Some(generator) => {
                    info!("Using LLM to fill {} unmatched fields...", pending.len());
                    self.generate_all(generator, &fields, &pending, context, &mut resolutions)
                        .await;
                }
                None => warn!(
                    "Generative fallback not configured; {} fields left unmatched",
                    pending.len()
                ),
            }
        }

        let outcome = collect_outcome(&fields, resolutions);
        info!(
            "Fill complete: constant={} semantic={} llm={} unmatched={} total={}",
            outcome.metadata.constant_matches,
            outcome.metadata.semantic_matches,
            outcome.metadata.llm_matches,
            outcome.metadata.unmatched,
            outcome.metadata.total_fields
        );
        if outcome.usage.request_count > 0 {
            info!(
                "LLM token usage: input={} output={} total={} requests={}",
                outcome.usage.input_tokens,
                outcome.usage.output_tokens,
                outcome.usage.input_tokens + outcome.usage.output_tokens,
                outcome.usage.request_count
            );
        }
        outcome
    }

    async fn match_all(
        &self,
        fields: &Arc<Vec<FieldDescriptor>>,
        context: &FieldContext,
        resolutions: &mut [Resolution],
    ) {
        let mut tasks = JoinSet::new();
        for i in 0..fields.len() {
            let matcher = self.matcher.clone();
            let fields = Arc::clone(fields);
            let constants = Arc::clone(&context.constants);
            tasks.spawn(
                async move {
                    let field = &fields[i];
                    let result = matcher
                        .match_field(&field.label, &field.name, &field.placeholder, &constants)
                        .await;
                    (i, result)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, result)) => {
                    if let Some(value) = result.value() {
                        debug!("'{}' → {value}", fields[i].label);
                    }
                    resolutions[i] = Resolution::from_match(result);
                }
                Err(e) => warn!("Field matching task failed: {e}"),
            }
        }
    }

    async fn generate_all(
        &self,
        generator: &GenerativeFallback,
        fields: &Arc<Vec<FieldDescriptor>>,
        pending: &[usize],
        context: &FieldContext,
        resolutions: &mut [Resolution],
    ) {
        let permits = Arc::new(Semaphore::new(self.llm_concurrency));
        let context = Arc::new(context.clone());
        let mut tasks = JoinSet::new();

        for &i in pending {
            let generator = generator.clone();
            let fields = Arc::clone(fields);
            let context = Arc::clone(&context);
            let permits = Arc::clone(&permits);
            tasks.spawn(
                async move {
                    let _permit = permits.acquire_owned().await.ok();
                    (i, generator.fill(&fields[i], &context).await)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, Ok(answer))) => {
                    debug!("'{}' → {} (llm)", fields[i].label, answer.value);
                    resolutions[i] = Resolution::Generated(answer);
                }
                Ok((i, Err(e))) => warn!("LLM failed for '{}': {e}", fields[i].label),
                Err(e) => warn!("Field generation task failed: {e}"),
            }
        }
    }
}

fn collect_outcome(fields: &[FieldDescriptor], resolutions: Vec<Resolution>) -> FillOutcome {
    let mut outcome = FillOutcome {
        metadata: FillMetadata {
            total_fields: fields.len(),
            ..Default::default()
        },
        ..Default::default()
    };

    for (field, resolution) in fields.iter().zip(resolutions) {
        let value = match resolution {
            Resolution::Constant(value) => {
                outcome.metadata.constant_matches += 1;
                value
            }
            Resolution::Semantic(value) => {
                outcome.metadata.semantic_matches += 1;
                value
            }
            Resolution::Generated(answer) => {
                outcome.metadata.llm_matches += 1;
                outcome.usage.add(answer.usage);
                answer.value
            }
            Resolution::Unmatched => {
                outcome.metadata.unmatched += 1;
                continue;
            }
        };
        outcome.fields.insert(field.id.clone(), value);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::semantic::EmbeddingIndex;
    use crate::matcher::test_support::{constants, FakeEmbedder, FakeGenerator};
    use crate::matcher::FieldOption;
    use std::time::Duration;

    fn field(id: &str, label: &str) -> FieldDescriptor {
        FieldDescriptor {
            id: id.to_string(),
            label: label.to_string(),
            field_type: "text".to_string(),
            ..Default::default()
        }
    }

    fn context() -> FieldContext {
        FieldContext {
            job_title: "Backend Engineer".to_string(),
            company: "Acme".to_string(),
            constants: constants(&[
                ("first_name", "Luke"),
                ("last_name", "Stogsdill"),
                ("email", "luke@example.com"),
                ("authorized_to_work", "yes"),
            ]),
            ..Default::default()
        }
    }

    async fn semantic_matcher(c: &FieldContext) -> FieldMatcher {
        let embedder = FakeEmbedder::new(&[
            ("authorized to work", &[1.0, 0.0, 0.0]),
            ("email", &[0.0, 1.0, 0.0]),
            ("first name", &[0.0, 0.0, 1.0]),
            ("last name", &[0.0, 0.5, 0.5]),
        ])
        .with_query("are you legally allowed to work here", &[0.95, 0.05, 0.0]);
        let index = Arc::new(EmbeddingIndex::new(
            Arc::new(embedder),
            Duration::from_secs(5),
        ));
        index.init(&c.constants).await.unwrap();
        FieldMatcher::new(Some(index), 0.7)
    }

    fn form() -> Vec<FieldDescriptor> {
        vec![
            field("f1", "First Name"),
            field("f2", "Surname"),
            field("f3", "Are you legally allowed to work here?"),
            field("f4", "Why do you want to join Acme?"),
            FieldDescriptor {
                id: "f5".to_string(),
                label: "How did you hear about us?".to_string(),
                field_type: "select".to_string(),
                options: vec![
                    FieldOption {
                        text: "LinkedIn".to_string(),
                        value: "li".to_string(),
                    },
                    FieldOption {
                        text: "Referral".to_string(),
                        value: "ref".to_string(),
                    },
                ],
                ..Default::default()
            },
        ]
    }

    #[tokio::test]
    async fn test_counts_sum_to_total_with_no_double_counting() {
        let ctx = context();
        let generator = Arc::new(FakeGenerator::answering("LinkedIn"));
        let engine = AutofillEngine::new(
            semantic_matcher(&ctx).await,
            Some(GenerativeFallback::new(
                generator.clone(),
                Duration::from_secs(5),
            )),
            2,
        );

        let outcome = engine.batch_fill(form(), &ctx, FillMode::Full).await;
        let m = &outcome.metadata;

        assert_eq!(m.total_fields, 5);
        assert_eq!(m.constant_matches, 2);
        assert_eq!(m.semantic_matches, 1);
        assert_eq!(m.llm_matches, 2);
        assert_eq!(m.unmatched, 0);
        assert_eq!(
            m.constant_matches + m.semantic_matches + m.llm_matches + m.unmatched,
            m.total_fields
        );

        assert_eq!(outcome.fields["f1"], "Luke");
        assert_eq!(outcome.fields["f2"], "Stogsdill");
        assert_eq!(outcome.fields["f3"], "yes");
        assert_eq!(outcome.fields["f4"], "LinkedIn");
        assert_eq!(outcome.fields["f5"], "li");
        assert_eq!(generator.calls(), 2);
        assert_eq!(outcome.usage.request_count, 2);
        assert_eq!(outcome.usage.input_tokens, 200);
    }

    #[tokio::test]
    async fn test_constants_only_never_calls_generator() {
        let ctx = context();
        let generator = Arc::new(FakeGenerator::answering("anything"));
        let engine = AutofillEngine::new(
            FieldMatcher::new(None, 0.5),
            Some(GenerativeFallback::new(
                generator.clone(),
                Duration::from_secs(5),
            )),
            2,
        );

        let outcome = engine
            .batch_fill(form(), &ctx, FillMode::ConstantsOnly)
            .await;

        assert_eq!(generator.calls(), 0);
        assert_eq!(outcome.metadata.constant_matches, 2);
        assert_eq!(outcome.metadata.unmatched, 3);
        assert!(!outcome.fields.contains_key("f4"));
    }

    #[tokio::test]
    async fn test_without_index_semantic_labels_fall_through() {
        let ctx = context();
        let engine = AutofillEngine::new(FieldMatcher::new(None, 0.5), None, 2);

        let outcome = engine.batch_fill(form(), &ctx, FillMode::Full).await;

        assert_eq!(outcome.metadata.semantic_matches, 0);
        assert_eq!(outcome.metadata.constant_matches, 2);
        assert_eq!(outcome.metadata.unmatched, 3);
        assert_eq!(outcome.usage, UsageTotals::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_failure_counts_as_unmatched() {
        let ctx = context();
        let generator = Arc::new(FakeGenerator::scripted(vec![]));
        let engine = AutofillEngine::new(
            FieldMatcher::new(None, 0.5),
            Some(GenerativeFallback::new(
                generator.clone(),
                Duration::from_secs(5),
            )),
            4,
        );

        let outcome = engine
            .batch_fill(vec![field("q", "Why us?")], &ctx, FillMode::Full)
            .await;

        assert_eq!(outcome.metadata.unmatched, 1);
        assert!(outcome.fields.is_empty());
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_generative_only_skips_constants() {
        let ctx = context();
        let generator = Arc::new(FakeGenerator::answering("Generated"));
        let engine = AutofillEngine::new(
            FieldMatcher::new(None, 0.5),
            Some(GenerativeFallback::new(
                generator.clone(),
                Duration::from_secs(5),
            )),
            1,
        );

        let outcome = engine
            .batch_fill(vec![field("f1", "First Name")], &ctx, FillMode::GenerativeOnly)
            .await;

        assert_eq!(outcome.fields["f1"], "Generated");
        assert_eq!(outcome.metadata.llm_matches, 1);
        assert_eq!(outcome.metadata.constant_matches, 0);
    }

    #[tokio::test]
    async fn test_generated_fields_see_company_info_and_background() {
        let mut ctx = context();
        ctx.company_info = "Acme builds reusable rockets.".to_string();
        ctx.background = "Five years of backend Rust.".to_string();
        let generator = Arc::new(FakeGenerator::answering("Because of the rockets"));
        let engine = AutofillEngine::new(
            FieldMatcher::new(None, 0.5),
            Some(GenerativeFallback::new(
                generator.clone(),
                Duration::from_secs(5),
            )),
            1,
        );

        let outcome = engine
            .batch_fill(vec![field("q", "Why Acme?")], &ctx, FillMode::Full)
            .await;

        assert_eq!(outcome.fields["q"], "Because of the rockets");
        let prompt = generator.last_prompt().unwrap();
        assert!(prompt.contains("Field Label: Why Acme?"));
        assert!(prompt.contains("Acme builds reusable rockets."));
        assert!(prompt.contains("Five years of backend Rust."));
        assert!(prompt.contains("Position: Backend Engineer"));
        assert!(!prompt.contains("luke@example.com"));
    }

    #[tokio::test]
    async fn test_fill_field_with_fallback() {
        let ctx = context();
        let engine = AutofillEngine::new(
            FieldMatcher::new(None, 0.5),
            Some(GenerativeFallback::new(
                Arc::new(FakeGenerator::answering("Because of the mission")),
                Duration::from_secs(5),
            )),
            1,
        );

        assert_eq!(
            engine
                .fill_field_with_fallback(&field("a", "Email"), &ctx)
                .await
                .unwrap(),
            "luke@example.com"
        );
        assert_eq!(
            engine
                .fill_field_with_fallback(&field("b", "Why Acme?"), &ctx)
                .await
                .unwrap(),
            "Because of the mission"
        );

        let constants_only = AutofillEngine::new(FieldMatcher::new(None, 0.5), None, 1);
        assert!(matches!(
            constants_only
                .fill_field_with_fallback(&field("b", "Why Acme?"), &ctx)
                .await,
            Err(FillError::GenerationDisabled)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_ids_still_count_each_field_once() {
        let ctx = context();
        let engine = AutofillEngine::new(FieldMatcher::new(None, 0.5), None, 1);

        let outcome = engine
            .batch_fill(
                vec![field("dup", "Email"), field("dup", "First Name")],
                &ctx,
                FillMode::Full,
            )
            .await;

        assert_eq!(outcome.metadata.constant_matches, 2);
        assert_eq!(outcome.metadata.total_fields, 2);
        assert_eq!(outcome.fields.len(), 1);
    }
}
