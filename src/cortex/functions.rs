//! HS-020: AI function identities, argument signatures and result shapes.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Built-in AI operations of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AiFunction {
    Translate,
    Sentiment,
    EntitySentiment,
    SplitText,
    Embed,
    Classify,
    Filter,
    Aggregate,
    Summarize,
    Similarity,
    Complete,
    CompleteStructured,
    Search,
}

impl AiFunction {
    pub const ALL: [AiFunction; 13] = [
        Self::Translate,
        Self::Sentiment,
        Self::EntitySentiment,
        Self::SplitText,
        Self::Embed,
        Self::Classify,
        Self::Filter,
        Self::Aggregate,
        Self::Summarize,
        Self::Similarity,
        Self::Complete,
        Self::CompleteStructured,
        Self::Search,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Translate => "translate",
            Self::Sentiment => "sentiment",
            Self::EntitySentiment => "entity_sentiment",
            Self::SplitText => "split_text",
            Self::Embed => "embed",
            Self::Classify => "classify",
            Self::Filter => "filter",
            Self::Aggregate => "aggregate",
            Self::Summarize => "summarize",
            Self::Similarity => "similarity",
            Self::Complete => "complete",
            Self::CompleteStructured => "complete_structured",
            Self::Search => "search",
        }
    }

    /// Positional parameters, in call order.
    pub fn params(self) -> &'static [Param] {
        use ParamShape::*;
        match self {
            Self::Translate => {
                const P: &[Param] = &[
                    Param::required("text", Text),
                    Param::defaulted("from", Text, DefaultValue::Text("")),
                    Param::required("to", Text),
                ];
                P
            }
            Self::Sentiment => {
                const P: &[Param] = &[Param::required("text", Text)];
                P
            }
            Self::EntitySentiment => {
                const P: &[Param] = &[
                    Param::required("text", Text),
                    Param::optional("categories", Array),
                ];
                P
            }
            Self::SplitText => {
                const P: &[Param] = &[
                    Param::required("text", Text),
                    Param::defaulted("format", Text, DefaultValue::Text("none")),
                    Param::defaulted("chunk_size", Integer, DefaultValue::Int(300)),
                    Param::defaulted("overlap", Integer, DefaultValue::Int(30)),
                ];
                P
            }
            Self::Embed => {
                const P: &[Param] = &[
                    Param::defaulted("model", Text, DefaultValue::Text("multilingual-e5-large")),
                    Param::required("text", Text),
                ];
                P
            }
            Self::Classify => {
                const P: &[Param] = &[
                    Param::required("text", Text),
                    Param::required("categories", Array),
                ];
                P
            }
            Self::Filter => {
                const P: &[Param] = &[Param::required("predicate", Text)];
                P
            }
            Self::Aggregate => {
                const P: &[Param] = &[
                    Param::required("text", Text),
                    Param::required("instruction", Text),
                ];
                P
            }
            Self::Summarize => {
                const P: &[Param] = &[Param::required("text", Text)];
                P
            }
            Self::Similarity => {
                const P: &[Param] = &[
                    Param::required("left", Text),
                    Param::required("right", Text),
                ];
                P
            }
            Self::Complete => {
                const P: &[Param] = &[
                    Param::defaulted("model", Text, DefaultValue::Text("claude-3-5-sonnet")),
                    Param::required("prompt", Text),
                ];
                P
            }
            Self::CompleteStructured => {
                const P: &[Param] = &[
                    Param::defaulted("model", Text, DefaultValue::Text("claude-3-5-sonnet")),
                    Param::required("prompt", Text),
                    Param::required("schema", Object),
                ];
                P
            }
            Self::Search => {
                const P: &[Param] = &[
                    Param::required("service", Text),
                    Param::required("query", Text),
                    Param::required("columns", Array),
                    Param::defaulted("limit", Integer, DefaultValue::Int(3)),
                    Param::optional("filter", Object),
                ];
                P
            }
        }
    }

    /// Shape of the value the function returns.
    pub fn returns(self) -> ReturnShape {
        match self {
            Self::Translate => ReturnShape::TaggedText,
            Self::Sentiment | Self::Similarity => ReturnShape::Score,
            Self::EntitySentiment | Self::CompleteStructured => ReturnShape::Structured,
            Self::SplitText => ReturnShape::Chunks,
            Self::Embed => ReturnShape::Vector,
            Self::Classify => ReturnShape::Labels,
            Self::Filter => ReturnShape::Flag,
            Self::Aggregate | Self::Summarize | Self::Complete => ReturnShape::Text,
            Self::Search => ReturnShape::Hits,
        }
    }

    /// `translate(text, from = "", to) -> text`
    pub fn signature(self) -> String {
        let params = self
            .params()
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({}) -> {}", self.name(), params, self.returns())
    }
}

impl fmt::Display for AiFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AiFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| format!("unknown AI function '{}'", s))
    }
}

/// Value shape a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamShape {
    Text,
    Integer,
    Array,
    Object,
}

impl fmt::Display for ParamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Integer => write!(f, "integer"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Text(&'static str),
    Int(i64),
}

impl DefaultValue {
    fn to_json(self) -> serde_json::Value {
        match self {
            Self::Text(s) => serde_json::Value::String(s.to_string()),
            Self::Int(n) => serde_json::Value::from(n),
        }
    }
}

/// A positional function parameter.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub shape: ParamShape,
    pub required: bool,
    pub default: Option<DefaultValue>,
}

impl Param {
    const fn required(name: &'static str, shape: ParamShape) -> Self {
        Self {
            name,
            shape,
            required: true,
            default: None,
        }
    }

    const fn defaulted(name: &'static str, shape: ParamShape, default: DefaultValue) -> Self {
        Self {
            name,
            shape,
            required: false,
            default: Some(default),
        }
    }

    const fn optional(name: &'static str, shape: ParamShape) -> Self {
        Self {
            name,
            shape,
            required: false,
            default: None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.required, self.default) {
            (true, _) => write!(f, "{}: {}", self.name, self.shape),
            (false, Some(DefaultValue::Text(s))) => {
                write!(f, "{}: {} = {:?}", self.name, self.shape, s)
            }
            (false, Some(DefaultValue::Int(n))) => write!(f, "{}: {} = {}", self.name, self.shape, n),
            (false, None) => write!(f, "{}?: {}", self.name, self.shape),
        }
    }
}

/// Shape of a function result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    Text,
    TaggedText,
    Score,
    Flag,
    Labels,
    Chunks,
    Vector,
    Structured,
    Hits,
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::TaggedText => "text@language",
            Self::Score => "score",
            Self::Flag => "boolean",
            Self::Labels => "labels",
            Self::Chunks => "array<text>",
            Self::Vector => "vector",
            Self::Structured => "object",
            Self::Hits => "hits",
        };
        write!(f, "{}", s)
    }
}

/// Arguments matched to a function's parameters, defaults filled in.
/// Entries are in parameter order; omitted optional parameters are absent.
pub type BoundArgs = Vec<(Param, serde_json::Value)>;

/// Check named arguments against the signature and fill defaults.
pub fn bind_args(
    function: AiFunction,
    provided: &IndexMap<String, serde_json::Value>,
) -> Result<BoundArgs, String> {
    let params = function.params();

    for name in provided.keys() {
        if !params.iter().any(|p| p.name == name) {
            return Err(format!(
                "{} has no argument '{}' (signature: {})",
                function,
                name,
                function.signature()
            ));
        }
    }

    let mut bound = Vec::with_capacity(params.len());
    for param in params {
        let value = match (provided.get(param.name), param.default) {
            (Some(v), _) if !v.is_null() => v.clone(),
            (_, Some(default)) => default.to_json(),
            _ if param.required => {
                return Err(format!(
                    "{} requires argument '{}' ({})",
                    function, param.name, param.shape
                ))
            }
            _ => continue,
        };
        check_shape(function, param, &value)?;
        bound.push((*param, value));
    }
    Ok(bound)
}

fn check_shape(function: AiFunction, param: &Param, value: &serde_json::Value) -> Result<(), String> {
    let ok = match param.shape {
        ParamShape::Text => value.is_string(),
        ParamShape::Integer => value.is_i64() || value.is_u64(),
        ParamShape::Array => value.is_array(),
        ParamShape::Object => value.is_object(),
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "argument '{}' of {} must be {}, got {}",
            param.name, function, param.shape, value
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, serde_json::Value)]) -> IndexMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_hs020_from_str() {
        assert_eq!("translate".parse::<AiFunction>().unwrap(), AiFunction::Translate);
        assert_eq!(
            "complete-structured".parse::<AiFunction>().unwrap(),
            AiFunction::CompleteStructured
        );
        assert_eq!("Split_Text".parse::<AiFunction>().unwrap(), AiFunction::SplitText);
        assert!("summarise".parse::<AiFunction>().is_err());
    }

    #[test]
    fn test_hs020_names_roundtrip() {
        for f in AiFunction::ALL {
            assert_eq!(f.name().parse::<AiFunction>().unwrap(), f);
        }
    }

    #[test]
    fn test_hs020_signature() {
        assert_eq!(
            AiFunction::Translate.signature(),
            "translate(text: text, from: text = \"\", to: text) -> text@language"
        );
        assert!(AiFunction::EntitySentiment.signature().contains("categories?: array"));
    }

    #[test]
    fn test_hs020_bind_fills_defaults() {
        let bound = bind_args(
            AiFunction::SplitText,
            &args(&[("text", json!("長いレビュー"))]),
        )
        .unwrap();
        let values: Vec<_> = bound.iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(values, vec![json!("長いレビュー"), json!("none"), json!(300), json!(30)]);
    }

    #[test]
    fn test_hs020_bind_skips_optional() {
        let bound = bind_args(
            AiFunction::EntitySentiment,
            &args(&[("text", json!("great coffee, slow delivery"))]),
        )
        .unwrap();
        assert_eq!(bound.len(), 1);
    }

    #[test]
    fn test_hs020_bind_unknown_arg() {
        let err = bind_args(
            AiFunction::Sentiment,
            &args(&[("text", json!("x")), ("lang", json!("en"))]),
        )
        .unwrap_err();
        assert!(err.contains("no argument 'lang'"));
    }

    #[test]
    fn test_hs020_bind_missing_required() {
        let err = bind_args(AiFunction::Translate, &args(&[("text", json!("x"))])).unwrap_err();
        assert!(err.contains("requires argument 'to'"));
    }

    #[test]
    fn test_hs020_bind_wrong_shape() {
        let err = bind_args(
            AiFunction::Classify,
            &args(&[("text", json!("x")), ("categories", json!("a,b"))]),
        )
        .unwrap_err();
        assert!(err.contains("must be array"));
    }

    #[test]
    fn test_hs020_return_shapes() {
        assert_eq!(AiFunction::Translate.returns(), ReturnShape::TaggedText);
        assert_eq!(AiFunction::Filter.returns(), ReturnShape::Flag);
        assert_eq!(AiFunction::Search.returns(), ReturnShape::Hits);
    }
}
