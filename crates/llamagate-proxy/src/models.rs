//! Request/response DTOs for the client-facing OpenAI-compatible surface.

use llamagate_core::{ErrorCategory, GatewayError, ModelConfig};
use serde::{Deserialize, Serialize};

/// Just enough of an OpenAI chat/completions body to resolve a model; the
/// rest of the payload is forwarded untouched.
#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelListing>,
}

#[derive(Debug, Serialize)]
pub struct ModelListing {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

impl ModelsResponse {
    pub fn from_configs(configs: &[ModelConfig]) -> Self {
        let mut data: Vec<ModelListing> = configs
            .iter()
            .map(|c| ModelListing {
                id: c.name.clone(),
                object: "model",
                created: 0,
                owned_by: "llamagate",
            })
            .collect();
        data.sort_by(|a, b| a.id.cmp(&b.id));
        Self { object: "list", data }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ErrorBody {
    pub fn from_gateway_error(err: &GatewayError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.code(),
                message: err.to_string(),
                kind: err.category().as_str(),
            },
        }
    }

    pub fn new(code: &'static str, message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            error: ErrorDetail {
                code,
                message: message.into(),
                kind: category.as_str(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelMetrics {
    pub status: &'static str,
    pub request_count: u64,
    pub memory_usage_mb: Option<u64>,
    pub cpu_usage_percent: Option<f32>,
    pub uptime: Option<u64>,
    pub last_accessed: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub models: std::collections::HashMap<String, ModelMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_response_is_sorted_by_id() {
        let configs = vec![
            ModelConfig {
                name: "zeta".into(),
                port: 1,
                model_path: "p".into(),
                context_length: None,
                gpu_layers: None,
                chat_format: None,
                additional_args: vec![],
                priority: 5,
                resource_group: None,
                auto_start: false,
                preload: false,
                max_queue_size: None,
                request_timeout_secs: None,
            },
            ModelConfig {
                name: "alpha".into(),
                port: 2,
                model_path: "p".into(),
                context_length: None,
                gpu_layers: None,
                chat_format: None,
                additional_args: vec![],
                priority: 5,
                resource_group: None,
                auto_start: false,
                preload: false,
                max_queue_size: None,
                request_timeout_secs: None,
            },
        ];
        let response = ModelsResponse::from_configs(&configs);
        assert_eq!(response.data[0].id, "alpha");
        assert_eq!(response.data[1].id, "zeta");
    }
}
