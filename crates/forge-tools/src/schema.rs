// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::{json, Map, Value};

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Declared parameter of a tool.
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
            default: None,
            enum_values: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, v: impl Into<Value>) -> Self {
        self.default = Some(v.into());
        self
    }

    pub fn enum_of(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.minimum = min;
        self.maximum = max;
        self
    }

    pub fn length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        if !self.param_type.accepts(value) {
            return Err(format!(
                "parameter '{}' must be of type {}",
                self.name,
                self.param_type.as_str()
            ));
        }
        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                return Err(format!("parameter '{}' must be one of {allowed:?}", self.name));
            }
        }
        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(format!("parameter '{}' must be >= {min}", self.name));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(format!("parameter '{}' must be <= {max}", self.name));
                }
            }
        }
        if let Some(s) = value.as_str() {
            if let Some(min) = self.min_length {
                if s.len() < min {
                    return Err(format!(
                        "parameter '{}' must be at least {min} characters",
                        self.name
                    ));
                }
            }
            if let Some(max) = self.max_length {
                if s.len() > max {
                    return Err(format!(
                        "parameter '{}' must be at most {max} characters",
                        self.name
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Validate `args` against a parameter list.
///
/// Missing required fields fail fast; declared optional fields get their
/// default injected; unknown extra fields are preserved untouched.
/// Returns the validated (and defaulted) argument object.
pub fn validate_args(params: &[ToolParameter], args: &Value) -> Result<Value, String> {
    let mut map: Map<String, Value> = match args {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        _ => return Err("arguments must be a JSON object".into()),
    };

    for param in params {
        match map.get(&param.name) {
            Some(Value::Null) | None => {
                if param.required {
                    return Err(format!("missing required parameter '{}'", param.name));
                }
                if let Some(default) = &param.default {
                    map.insert(param.name.clone(), default.clone());
                }
            }
            Some(value) => param.check(value)?,
        }
    }

    Ok(Value::Object(map))
}

/// JSON Schema for the parameter list, in the shape the model API expects.
pub fn parameters_schema(params: &[ToolParameter]) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<Value> = Vec::new();
    for p in params {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(p.param_type.as_str()));
        prop.insert("description".into(), json!(p.description));
        if let Some(e) = &p.enum_values {
            prop.insert("enum".into(), json!(e));
        }
        if let Some(d) = &p.default {
            prop.insert("default".into(), d.clone());
        }
        if let Some(min) = p.minimum {
            prop.insert("minimum".into(), json!(min));
        }
        if let Some(max) = p.maximum {
            prop.insert("maximum".into(), json!(max));
        }
        properties.insert(p.name.clone(), Value::Object(prop));
        if p.required {
            required.push(json!(p.name));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
