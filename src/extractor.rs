//! Extracción de registros estructurados a partir de texto libre.
//!
//! Contrato: una única llamada al modelo por documento, sin reintentos. Si la
//! llamada falla o su salida no valida contra el esquema, se devuelve el
//! registro de reserva determinista; nunca se propaga un error al llamante.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    error::PipelineError,
    llm::LanguageModel,
    schema::{ExtractionSchema, RecordKind},
};

/// Registro siempre completo: o todos los campos vienen del modelo
/// (`well_formed == true`) o todos son valores de reserva.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord<R> {
    pub fields: R,
    pub well_formed: bool,
}

pub struct StructuredExtractor<M> {
    model: M,
}

impl<M: LanguageModel> StructuredExtractor<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Extrae un registro de tipo `R` de `document_text`. `context` se incrusta
    /// literalmente en la petición (p. ej. la procedencia de una reseña).
    pub async fn extract<R: RecordKind>(
        &self,
        document_text: &str,
        context: &[(&str, &str)],
    ) -> ExtractedRecord<R> {
        let schema = R::schema();

        // Un documento vacío no tiene señal que recuperar: no se consulta al modelo.
        if document_text.trim().is_empty() {
            debug!("Documento vacío; se usa el registro de reserva de '{}'", schema.document_kind);
            return fallback_record(document_text);
        }

        let prompt = build_prompt(&schema, document_text, context);
        let completion = match self.model.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "Fallo en la llamada al modelo para un {}: {:#}. Se usa el registro de reserva.",
                    schema.document_kind, e
                );
                return fallback_record(document_text);
            }
        };

        match parse_completion::<R>(&schema, &completion) {
            Ok(fields) => ExtractedRecord { fields, well_formed: true },
            Err(e) => {
                warn!(
                    "No se pudo validar la salida del modelo para un {}. Error: {}. Respuesta LLM: '{}'",
                    schema.document_kind, e, completion
                );
                fallback_record(&completion)
            }
        }
    }
}

fn fallback_record<R: RecordKind>(raw: &str) -> ExtractedRecord<R> {
    ExtractedRecord {
        fields: R::fallback(raw.to_string()),
        well_formed: false,
    }
}

/// Construye la petición: campos e instrucciones literales, contexto y documento
/// tal cual, y la exigencia de un único objeto JSON plano.
pub fn build_prompt(schema: &ExtractionSchema, document_text: &str, context: &[(&str, &str)]) -> String {
    let mut prompt = format!(
        "Extract the following fields from this {}:\n",
        schema.document_kind
    );
    for (i, field) in schema.fields.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. {} ({}): {}\n",
            i + 1,
            field.name,
            field.type_hint(),
            field.instruction
        ));
    }

    if !context.is_empty() {
        prompt.push_str("\nContext:\n");
        for (key, value) in context {
            prompt.push_str(&format!("{key}: {value}\n"));
        }
    }

    prompt.push_str(&format!("\n{}:\n{}\n\n", capitalize(schema.document_kind), document_text));

    let keys: Vec<&str> = schema.field_names().collect();
    prompt.push_str(&format!(
        "Respond with exactly one flat JSON object with these keys and one value per key: {}. \
         Do not add any commentary.",
        keys.join(", ")
    ));
    prompt
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Quita la valla de código Markdown que algunos modelos añaden, con o sin
/// etiqueta de lenguaje (`json`, `JSON`, `jsonc`...).
fn strip_code_fence(completion: &str) -> &str {
    let text = completion.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decodifica la salida del modelo como objeto JSON y la valida contra el esquema.
fn parse_completion<R: RecordKind>(schema: &ExtractionSchema, completion: &str) -> Result<R, PipelineError> {
    let json_text = strip_code_fence(completion);

    let object: Map<String, Value> = serde_json::from_str(json_text)
        .map_err(|e| PipelineError::MalformedModelOutput(e.to_string()))?;
    let canonical = schema.canonicalize(&object)?;

    serde_json::from_value(Value::Object(canonical))
        .map_err(|e| PipelineError::MalformedModelOutput(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedModel;
    use super::*;
    use crate::models::{EmailInsights, Priority, ReviewInsights, Sentiment};
    use anyhow::anyhow;

    const EMAIL: &str =
        "Hello, I'm John Doe. I love your Widget X product but would like to request a new feature.";

    #[tokio::test]
    async fn well_formed_completion_is_canonicalized() {
        let model = ScriptedModel::replying(vec![Ok(r#"```json
{"customer_name": "John Doe", "product": "Widget X", "sentiment": "Positive",
 "main_issue": "Feature request", "priority": "MEDIUM", "confidence": 0.9}
```"#
            .to_string())]);
        let extractor = StructuredExtractor::new(&model);

        let record: ExtractedRecord<EmailInsights> = extractor.extract(EMAIL, &[]).await;

        assert!(record.well_formed);
        assert_eq!(model.calls(), 1);
        assert_eq!(
            record.fields,
            EmailInsights {
                customer_name: "John Doe".into(),
                product: "Widget X".into(),
                sentiment: Sentiment::Positive,
                main_issue: "Feature request".into(),
                priority: Priority::Medium,
            }
        );
    }

    #[test]
    fn code_fences_are_stripped_whatever_the_language_tag() {
        assert_eq!(strip_code_fence("```JSON\n{\"a\": 1}\n```"), r#"{"a": 1}"#);
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[tokio::test]
    async fn uppercase_fenced_completion_is_well_formed() {
        let model = ScriptedModel::replying(vec![Ok("```JSON\n{\"customer_name\": \"Ana\", \"product\": \"Lamp\", \
             \"sentiment\": \"NEGATIVE\", \"main_issue\": \"Broken\", \"priority\": \"High\"}\n```"
            .to_string())]);
        let extractor = StructuredExtractor::new(&model);

        let record: ExtractedRecord<EmailInsights> = extractor.extract("The lamp arrived broken", &[]).await;

        assert!(record.well_formed);
        assert_eq!(record.fields.sentiment, Sentiment::Negative);
        assert_eq!(record.fields.priority, Priority::High);
    }

    #[tokio::test]
    async fn malformed_completion_falls_back_with_raw_output() {
        let model = ScriptedModel::replying(vec![Ok("Not JSON".to_string())]);
        let extractor = StructuredExtractor::new(&model);

        let record: ExtractedRecord<EmailInsights> = extractor.extract("Hello, I'm John Doe.", &[]).await;

        assert!(!record.well_formed);
        assert_eq!(model.calls(), 1);
        assert_eq!(record.fields.customer_name, "Unknown");
        assert_eq!(record.fields.product, "Unknown");
        assert_eq!(record.fields.sentiment, Sentiment::Neutral);
        assert_eq!(record.fields.priority, Priority::Medium);
        assert_eq!(record.fields.main_issue, "Not JSON");
    }

    #[tokio::test]
    async fn missing_field_falls_back_entirely() {
        let reply = r#"{"customer_name": "Ana", "product": "Lamp", "sentiment": "negative", "main_issue": "Broken"}"#;
        let model = ScriptedModel::replying(vec![Ok(reply.to_string())]);
        let extractor = StructuredExtractor::new(&model);

        let record: ExtractedRecord<EmailInsights> = extractor.extract("The lamp arrived broken", &[]).await;

        assert!(!record.well_formed);
        // Ni siquiera los campos válidos sobreviven: no hay estados mixtos.
        assert_eq!(record.fields.customer_name, "Unknown");
        assert_eq!(record.fields.sentiment, Sentiment::Neutral);
        assert_eq!(record.fields.main_issue, reply);
    }

    #[tokio::test]
    async fn failed_model_call_captures_document_text_without_retry() {
        let model = ScriptedModel::replying(vec![Err(anyhow!("timeout"))]);
        let extractor = StructuredExtractor::new(&model);

        let record: ExtractedRecord<EmailInsights> = extractor.extract(EMAIL, &[]).await;

        assert!(!record.well_formed);
        assert_eq!(model.calls(), 1);
        assert_eq!(record.fields.main_issue, EMAIL);
    }

    #[tokio::test]
    async fn empty_document_yields_fallback_without_model_call() {
        let model = ScriptedModel::default();
        let extractor = StructuredExtractor::new(&model);

        let record: ExtractedRecord<ReviewInsights> = extractor.extract("", &[]).await;

        assert!(!record.well_formed);
        assert_eq!(model.calls(), 0);
        assert_eq!(record.fields.summary, "");
        assert_eq!(record.fields.rating, 3);
        assert!(record.fields.positive_points.is_empty());
    }

    #[tokio::test]
    async fn review_context_and_schema_are_stated_in_prompt() {
        let reply = r#"{"product_name": "Lamp", "rating": "4", "sentiment": "positive",
            "positive_points": ["bright"], "negative_points": [], "suggestions": null,
            "summary": "Good lamp"}"#;
        let model = ScriptedModel::replying(vec![Ok(reply.to_string())]);
        let extractor = StructuredExtractor::new(&model);

        let record: ExtractedRecord<ReviewInsights> =
            extractor.extract("Bright lamp, works well.", &[("source", "shopify")]).await;

        assert!(record.well_formed);
        assert_eq!(record.fields.rating, 4);
        assert!(record.fields.suggestions.is_empty());

        let prompts = model.prompts.lock().unwrap();
        let prompt = &prompts[0];
        assert!(prompt.contains("source: shopify"));
        assert!(prompt.contains("Bright lamp, works well."));
        for field in ReviewInsights::schema().fields {
            assert!(prompt.contains(field.name));
            assert!(prompt.contains(field.instruction));
        }
    }
}
