//! Esquemas de extracción: lista ordenada de campos con tipo semántico e instrucción.
//!
//! Cada tipo de documento (email, reseña) tiene un esquema inmutable y un tipo de
//! registro de forma fija (`EmailInsights`, `ReviewInsights`). El esquema valida y
//! canoniza la salida del modelo; el tipo de registro da las garantías estáticas.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::PipelineError,
    models::{EmailInsights, Priority, ReviewInsights, Sentiment},
};

/// Valor centinela para campos de texto sin información.
pub const UNKNOWN: &str = "Unknown";

const SENTIMENTS: &[&str] = &["positive", "negative", "neutral"];
const PRIORITIES: &[&str] = &["high", "medium", "low"];

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Choice {
        options: &'static [&'static str],
        default: &'static str,
    },
    IntRange { min: i64, max: i64, default: i64 },
    TextList,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub instruction: &'static str,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind, instruction: &'static str) -> Self {
        Self { name, kind, instruction }
    }

    /// Descripción del tipo tal y como se le presenta al modelo.
    pub fn type_hint(&self) -> String {
        match &self.kind {
            FieldKind::Text => "string".to_string(),
            FieldKind::Choice { options, .. } => format!("one of: {}", options.join(", ")),
            FieldKind::IntRange { min, max, .. } => format!("integer from {min} to {max}"),
            FieldKind::TextList => "list of strings".to_string(),
        }
    }

    fn fallback_value(&self, raw_capture: Option<&str>) -> Value {
        match (&self.kind, raw_capture) {
            (FieldKind::Text, Some(raw)) => Value::String(raw.to_string()),
            (FieldKind::Text, None) => Value::String(UNKNOWN.to_string()),
            (FieldKind::Choice { default, .. }, _) => Value::String(default.to_string()),
            (FieldKind::IntRange { default, .. }, _) => Value::from(*default),
            (FieldKind::TextList, _) => Value::Array(Vec::new()),
        }
    }

    /// Valida un valor devuelto por el modelo y lo lleva a su forma canónica.
    fn canonicalize(&self, value: &Value) -> Result<Value, String> {
        match &self.kind {
            FieldKind::Text => match value {
                Value::String(s) => Ok(Value::String(s.trim().to_string())),
                Value::Null => Ok(Value::String(UNKNOWN.to_string())),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                other => Err(format!("'{}' debería ser texto, recibido {other}", self.name)),
            },
            FieldKind::Choice { options, .. } => {
                let candidate = value
                    .as_str()
                    .map(|s| s.trim().to_lowercase())
                    .ok_or_else(|| format!("'{}' debería ser texto, recibido {value}", self.name))?;
                if options.contains(&candidate.as_str()) {
                    Ok(Value::String(candidate))
                } else {
                    Err(format!("'{}' fuera de las opciones permitidas: '{candidate}'", self.name))
                }
            }
            FieldKind::IntRange { min, max, .. } => {
                let number = match value {
                    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(round_finite)),
                    Value::String(s) => {
                        let s = s.trim();
                        s.parse::<i64>()
                            .ok()
                            .or_else(|| s.parse::<f64>().ok().and_then(round_finite))
                    }
                    _ => None,
                }
                .ok_or_else(|| format!("'{}' debería ser un entero, recibido {value}", self.name))?;
                if (*min..=*max).contains(&number) {
                    Ok(Value::from(number))
                } else {
                    Err(format!("'{}' fuera de rango [{min}, {max}]: {number}", self.name))
                }
            }
            FieldKind::TextList => match value {
                Value::Null => Ok(Value::Array(Vec::new())),
                Value::String(s) if s.trim().is_empty() => Ok(Value::Array(Vec::new())),
                Value::String(s) => Ok(Value::Array(vec![Value::String(s.trim().to_string())])),
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(Value::String(s.trim().to_string())),
                        Value::Number(n) => Ok(Value::String(n.to_string())),
                        other => Err(format!("'{}' contiene un elemento no textual: {other}", self.name)),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                other => Err(format!("'{}' debería ser una lista, recibido {other}", self.name)),
            },
        }
    }
}

fn round_finite(f: f64) -> Option<i64> {
    f.is_finite().then(|| f.round() as i64)
}

/// Conjunto ordenado e inmutable de campos que una extracción debe rellenar.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSchema {
    /// Tipo de documento, p. ej. "email" o "review".
    pub document_kind: &'static str,
    pub fields: Vec<FieldSpec>,
    /// Campo de texto que recibe la salida en bruto cuando se usa la reserva.
    pub raw_capture: &'static str,
}

impl ExtractionSchema {
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    /// Comprueba la coherencia interna del esquema.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let misconfigured =
            |msg: String| PipelineError::Misconfiguration(format!("esquema '{}': {msg}", self.document_kind));

        if self.fields.is_empty() {
            return Err(misconfigured("no declara ningún campo".into()));
        }
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.name) {
                return Err(misconfigured(format!("campo duplicado '{}'", field.name)));
            }
            match &field.kind {
                FieldKind::Choice { options, default } if !options.contains(default) => {
                    return Err(misconfigured(format!(
                        "el valor por defecto '{default}' de '{}' no está entre sus opciones",
                        field.name
                    )));
                }
                FieldKind::IntRange { min, max, default } if !(min..=max).contains(&default) => {
                    return Err(misconfigured(format!(
                        "el valor por defecto {default} de '{}' está fuera de rango",
                        field.name
                    )));
                }
                _ => {}
            }
        }
        match self.fields.iter().find(|f| f.name == self.raw_capture) {
            Some(FieldSpec { kind: FieldKind::Text, .. }) => Ok(()),
            Some(_) => Err(misconfigured(format!(
                "el campo de captura '{}' debe ser de texto",
                self.raw_capture
            ))),
            None => Err(misconfigured(format!(
                "el campo de captura '{}' no existe",
                self.raw_capture
            ))),
        }
    }

    /// Valida un objeto decodificado: todos los campos declarados deben estar
    /// presentes; los desconocidos se ignoran.
    pub fn canonicalize(&self, object: &Map<String, Value>) -> Result<Map<String, Value>, PipelineError> {
        let mut canonical = Map::new();
        for field in &self.fields {
            let value = object.get(field.name).ok_or_else(|| {
                PipelineError::MalformedModelOutput(format!("falta el campo '{}'", field.name))
            })?;
            let value = field
                .canonicalize(value)
                .map_err(PipelineError::MalformedModelOutput)?;
            canonical.insert(field.name.to_string(), value);
        }
        Ok(canonical)
    }

    /// Objeto de reserva determinista: valores neutros en todos los campos salvo
    /// el de captura, que conserva `raw`.
    pub fn fallback_object(&self, raw: &str) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|f| {
                let capture = (f.name == self.raw_capture).then_some(raw);
                (f.name.to_string(), f.fallback_value(capture))
            })
            .collect()
    }

    /// Valores de un registro en el orden del esquema, listos para una fila tabular.
    pub fn row_values(&self, record: &Value) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| match record.get(f.name) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|i| i.as_str().map(String::from).unwrap_or_else(|| i.to_string()))
                    .collect::<Vec<_>>()
                    .join("; "),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect()
    }
}

/// Tipo de registro de forma fija asociado a un esquema de extracción.
pub trait RecordKind: Serialize + DeserializeOwned + JsonSchema + Sized {
    fn schema() -> ExtractionSchema;

    /// Registro de reserva con `raw_capture` en el campo de captura.
    fn fallback(raw_capture: String) -> Self;
}

impl RecordKind for EmailInsights {
    fn schema() -> ExtractionSchema {
        ExtractionSchema {
            document_kind: "email",
            fields: vec![
                FieldSpec::new("customer_name", FieldKind::Text, "Customer name, if available"),
                FieldSpec::new("product", FieldKind::Text, "Product mentioned, if any"),
                FieldSpec::new(
                    "sentiment",
                    FieldKind::Choice { options: SENTIMENTS, default: "neutral" },
                    "Overall sentiment of the customer",
                ),
                FieldSpec::new("main_issue", FieldKind::Text, "Main issue or request, in one sentence"),
                FieldSpec::new(
                    "priority",
                    FieldKind::Choice { options: PRIORITIES, default: "medium" },
                    "How urgently the business should respond",
                ),
            ],
            raw_capture: "main_issue",
        }
    }

    fn fallback(raw_capture: String) -> Self {
        Self {
            customer_name: UNKNOWN.to_string(),
            product: UNKNOWN.to_string(),
            sentiment: Sentiment::Neutral,
            main_issue: raw_capture,
            priority: Priority::Medium,
        }
    }
}

impl RecordKind for ReviewInsights {
    fn schema() -> ExtractionSchema {
        ExtractionSchema {
            document_kind: "review",
            fields: vec![
                FieldSpec::new("product_name", FieldKind::Text, "Product name, if mentioned"),
                FieldSpec::new(
                    "rating",
                    FieldKind::IntRange { min: 1, max: 5, default: 3 },
                    "Rating given or estimated on a 1-5 scale",
                ),
                FieldSpec::new(
                    "sentiment",
                    FieldKind::Choice { options: SENTIMENTS, default: "neutral" },
                    "Overall sentiment of the review",
                ),
                FieldSpec::new("positive_points", FieldKind::TextList, "Key positive points"),
                FieldSpec::new("negative_points", FieldKind::TextList, "Key negative points"),
                FieldSpec::new("suggestions", FieldKind::TextList, "Main suggestions for improvement, if any"),
                FieldSpec::new("summary", FieldKind::Text, "One-sentence summary of the review"),
            ],
            raw_capture: "summary",
        }
    }

    fn fallback(raw_capture: String) -> Self {
        Self {
            product_name: UNKNOWN.to_string(),
            rating: 3,
            sentiment: Sentiment::Neutral,
            positive_points: Vec::new(),
            negative_points: Vec::new(),
            suggestions: Vec::new(),
            summary: raw_capture,
        }
    }
}

/// Comprobación de arranque: el esquema es coherente, coincide con las
/// propiedades del tipo de registro y su objeto de reserva es representable.
pub fn verify_record_kind<R: RecordKind>() -> Result<(), PipelineError> {
    let schema = R::schema();
    schema.validate()?;

    let json_schema = schemars::schema_for!(R);
    let properties: BTreeSet<String> = json_schema
        .as_value()
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();
    let fields: BTreeSet<String> = schema.field_names().map(String::from).collect();
    if properties != fields {
        return Err(PipelineError::Misconfiguration(format!(
            "esquema '{}' no coincide con su tipo de registro: campos {:?}, propiedades {:?}",
            schema.document_kind, fields, properties
        )));
    }

    let probe = "probe";
    let expected = Value::Object(schema.fallback_object(probe));
    let actual = serde_json::to_value(R::fallback(probe.to_string()))
        .map_err(|e| PipelineError::Misconfiguration(e.to_string()))?;
    if expected != actual {
        return Err(PipelineError::Misconfiguration(format!(
            "la reserva de '{}' no coincide con la del esquema: {actual} != {expected}",
            schema.document_kind
        )));
    }
    serde_json::from_value::<R>(expected)
        .map(|_| ())
        .map_err(|e| PipelineError::Misconfiguration(e.to_string()))
}
