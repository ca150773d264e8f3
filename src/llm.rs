//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El núcleo sólo ve `LanguageModel`: texto de entrada, texto de salida, falible,
//! no determinista y sin límite de latencia.

use anyhow::{anyhow, Result};
use rig::completion::Prompt;

use crate::config::{AppConfig, LlmProvider};

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = r#"
Eres un extractor de datos estructurados para un equipo de negocio.
Respondes únicamente con un objeto JSON plano que contiene exactamente las claves pedidas.
Nunca añades explicaciones, comentarios ni texto fuera del JSON.
"#;

/// Capacidad mínima que el pipeline necesita de un modelo de lenguaje.
pub trait LanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

impl<T: LanguageModel> LanguageModel for &T {
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    async fn complete_with_openai(&self, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        let model_name = if self.chat_model.is_empty() {
            DEFAULT_CHAT_MODEL
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(SYSTEM_PROMPT)
            .temperature(0.0)
            .build();

        let completion = agent.prompt(prompt).await?;
        Ok(completion)
    }
}

impl LanguageModel for LlmManager {
    async fn complete(&self, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(prompt).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para completions",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn unwired_provider_fails_at_call_time() {
        let vars: HashMap<&str, &str> = [("LLM_PROVIDER", "gemini"), ("DATA_DIR", "/tmp/bi")]
            .into_iter()
            .collect();
        let cfg = AppConfig::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let manager = LlmManager::from_config(&cfg).unwrap();

        let err = tokio_test::block_on(manager.complete("hola")).unwrap_err();
        assert!(err.to_string().contains("Gemini"));
    }
}
