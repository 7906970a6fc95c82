use std::sync::Arc;

use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::ServiceResult;
use super::error::{ParseCause, ServiceError};
use super::token_registry::{TokenInfo, TokenRegistry};
use super::trade::TradeType;
use super::utils::parse_positive_decimal;
use crate::llm::TextCompletion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// A trade intent as extracted from free text.
///
/// `amount` is denominated in `token`: the token being bought for a buy, the token
/// being sold for a sell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParsedInstruction {
    pub action: TradeAction,
    pub amount: String,
    pub token: String,
    pub using: String,
}

/// A parsed instruction mapped onto registry tokens in swap direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapIntent {
    pub token_in: TokenInfo,
    pub token_out: TokenInfo,
    /// Human amount of [`SwapIntent::amount_token`].
    pub amount: String,
    pub trade_type: TradeType,
}

impl SwapIntent {
    /// The token `amount` is expressed in.
    pub fn amount_token(&self) -> &TokenInfo {
        match self.trade_type {
            TradeType::ExactOutput => &self.token_out,
            TradeType::ExactInput => &self.token_in,
        }
    }
}

impl ParsedInstruction {
    /// Canonicalizes into swap direction: a buy pays with `using` for `token`, a sell
    /// pays with `token` for `using`.
    pub fn to_intent(&self, registry: &TokenRegistry) -> ServiceResult<SwapIntent> {
        let token = lookup(registry, &self.token)?;
        let using = lookup(registry, &self.using)?;

        if token.address == using.address {
            return Err(ServiceError::Parse(ParseCause::SchemaViolation(format!(
                "{} and {} are the same token",
                self.token, self.using
            ))));
        }

        let (token_in, token_out, trade_type) = match self.action {
            TradeAction::Buy => (using, token, TradeType::ExactOutput),
            TradeAction::Sell => (token, using, TradeType::ExactInput),
        };

        Ok(SwapIntent {
            token_in,
            token_out,
            amount: self.amount.clone(),
            trade_type,
        })
    }
}

fn lookup(registry: &TokenRegistry, symbol: &str) -> ServiceResult<TokenInfo> {
    registry.lookup(symbol).copied().ok_or_else(|| {
        tracing::warn!("Token symbol not found in registry: {}", symbol);
        ServiceError::TokenNotFound(format!(
            "{} (Supported tokens: {})",
            symbol,
            registry.supported_tokens().join(", ")
        ))
    })
}

/// Builds the few-shot extraction prompt around the user's raw text.
pub fn build_prompt(text: &str) -> String {
    format!(
        r#"<s>[INST] Extract trading details from this text and output only valid JSON.
Input: {text}
Required JSON format:
{{
  "action": "buy" or "sell",
  "amount": "numeric amount without $ symbol",
  "token": "token symbol in uppercase",
  "using": "payment token in uppercase"
}}

Examples:
"Buy 100 USDC with WETH" -> {{"action": "buy", "amount": "100", "token": "USDC", "using": "WETH"}}
"Sell 5 WETH using USDC" -> {{"action": "sell", "amount": "5", "token": "WETH", "using": "USDC"}}
"Buy 50 USDC using WETH" -> {{"action": "buy", "amount": "50", "token": "USDC", "using": "WETH"}}

Output only the JSON for the input text, nothing else: [/INST]"#
    )
}

/// Strictly parses model output into an instruction.
///
/// Only surrounding whitespace is tolerated; prose or code fences around the object
/// make the whole output invalid.
pub fn parse_completion(generated: &str) -> Result<ParsedInstruction, ParseCause> {
    let value: Value = serde_json::from_str(generated.trim())
        .map_err(|e| ParseCause::InvalidJson(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(ParseCause::InvalidJson("expected a JSON object".to_string()));
    };

    let action = match required_str(&fields, "action")?.to_lowercase().as_str() {
        "buy" => TradeAction::Buy,
        "sell" => TradeAction::Sell,
        other => {
            return Err(ParseCause::SchemaViolation(format!(
                "action must be buy or sell, got '{other}'"
            )));
        }
    };

    let amount = required_str(&fields, "amount")?;
    parse_positive_decimal(&amount).map_err(ParseCause::SchemaViolation)?;

    let token = required_str(&fields, "token")?.to_uppercase();
    let using = required_str(&fields, "using")?.to_uppercase();
    if token == using {
        return Err(ParseCause::SchemaViolation(format!(
            "token and using are both {token}"
        )));
    }

    Ok(ParsedInstruction {
        action,
        amount,
        token,
        using,
    })
}

fn required_str(fields: &Map<String, Value>, name: &str) -> Result<String, ParseCause> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(ParseCause::EmptyField(name.to_string())),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ParseCause::EmptyField(name.to_string()))
        }
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(ParseCause::SchemaViolation(format!(
            "{name} must be a string, got {other}"
        ))),
    }
}

/// Turns free text into a [`ParsedInstruction`] through a text-completion service.
///
/// There is no retry: the service samples, so a failed extraction is reported and the
/// caller decides whether to submit the text again.
pub struct InstructionParser {
    completion: Arc<dyn TextCompletion>,
}

impl InstructionParser {
    pub fn new(completion: Arc<dyn TextCompletion>) -> Self {
        Self { completion }
    }

    #[instrument(skip(self, ct), err)]
    pub async fn parse(&self, text: &str, ct: &CancellationToken) -> ServiceResult<ParsedInstruction> {
        if text.trim().is_empty() {
            return Err(ServiceError::Parse(ParseCause::EmptyInput));
        }

        let prompt = build_prompt(text.trim());

        let generated = tokio::select! {
            biased;
            _ = ct.cancelled() => return Err(ServiceError::Cancelled),
            result = self.completion.complete(&prompt) => result
                .map_err(|e| ServiceError::Parse(ParseCause::CompletionFailed(e.to_string())))?,
        };

        tracing::info!("Generated instruction JSON: {}", generated.trim());
        parse_completion(&generated).map_err(ServiceError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::llm::{LlmError, LlmResult};

    struct Canned(Result<&'static str, LlmError>);

    #[async_trait]
    impl TextCompletion for Canned {
        async fn complete(&self, prompt: &str) -> LlmResult<String> {
            assert!(prompt.contains("[INST]"));
            self.0.clone().map(str::to_string)
        }
    }

    fn parser(reply: Result<&'static str, LlmError>) -> InstructionParser {
        InstructionParser::new(Arc::new(Canned(reply)))
    }

    #[test]
    fn test_prompt_embeds_text_and_examples() {
        let prompt = build_prompt("Buy 5 USDC using WETH");

        assert!(prompt.starts_with("<s>[INST]"));
        assert!(prompt.contains("Input: Buy 5 USDC using WETH\n"));
        assert!(prompt.contains(r#""Sell 5 WETH using USDC" -> {"action": "sell""#));
        assert!(prompt.trim_end().ends_with("[/INST]"));
    }

    #[test]
    fn test_parse_completion_should_work() {
        let parsed = parse_completion(
            r#"  {"action": "buy", "amount": "5", "token": "usdc", "using": "WETH"}
"#,
        )
        .unwrap();

        assert_eq!(
            parsed,
            ParsedInstruction {
                action: TradeAction::Buy,
                amount: "5".to_string(),
                token: "USDC".to_string(),
                using: "WETH".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_completion_rejects_non_json() {
        let err = parse_completion("Sure! Here is the JSON: {\"action\": \"buy\"}").unwrap_err();
        assert!(matches!(err, ParseCause::InvalidJson(_)));

        let err = parse_completion(r#"["buy", "5"]"#).unwrap_err();
        assert!(matches!(err, ParseCause::InvalidJson(_)));
    }

    #[test]
    fn test_parse_completion_schema_violations() {
        let cases = [
            r#"{"action": "hold", "amount": "5", "token": "USDC", "using": "WETH"}"#,
            r#"{"action": "buy", "amount": "five", "token": "USDC", "using": "WETH"}"#,
            r#"{"action": "buy", "amount": "-5", "token": "USDC", "using": "WETH"}"#,
            r#"{"action": "buy", "amount": 5, "token": "USDC", "using": "WETH"}"#,
            r#"{"action": "buy", "amount": "5", "token": "WETH", "using": "weth"}"#,
        ];

        for raw in cases {
            let err = parse_completion(raw).unwrap_err();
            assert!(
                matches!(err, ParseCause::SchemaViolation(_)),
                "expected schema violation for {raw}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_completion_empty_fields() {
        let err = parse_completion(r#"{"action": "buy", "amount": "5", "token": "USDC"}"#)
            .unwrap_err();
        assert_eq!(err, ParseCause::EmptyField("using".to_string()));

        let err = parse_completion(r#"{"action": "buy", "amount": " ", "token": "USDC", "using": "WETH"}"#)
            .unwrap_err();
        assert_eq!(err, ParseCause::EmptyField("amount".to_string()));

        let err = parse_completion(r#"{"action": null, "amount": "1", "token": "USDC", "using": "WETH"}"#)
            .unwrap_err();
        assert_eq!(err, ParseCause::EmptyField("action".to_string()));
    }

    #[test]
    fn test_buy_and_sell_canonicalize_direction() {
        let registry = TokenRegistry::new();

        let buy = parse_completion(r#"{"action": "buy", "amount": "5", "token": "USDC", "using": "WETH"}"#)
            .unwrap()
            .to_intent(&registry)
            .unwrap();
        assert_eq!(buy.token_in.symbol, "WETH");
        assert_eq!(buy.token_out.symbol, "USDC");
        assert_eq!(buy.trade_type, TradeType::ExactOutput);
        assert_eq!(buy.amount_token().symbol, "USDC");

        let sell = parse_completion(r#"{"action": "sell", "amount": "5", "token": "WETH", "using": "USDC"}"#)
            .unwrap()
            .to_intent(&registry)
            .unwrap();
        assert_eq!(sell.token_in.symbol, "WETH");
        assert_eq!(sell.token_out.symbol, "USDC");
        assert_eq!(sell.trade_type, TradeType::ExactInput);
        assert_eq!(sell.amount_token().symbol, "WETH");
    }

    #[test]
    fn test_unknown_symbol_and_alias_collision() {
        let registry = TokenRegistry::new();

        let unknown = ParsedInstruction {
            action: TradeAction::Buy,
            amount: "1".to_string(),
            token: "PEPE".to_string(),
            using: "WETH".to_string(),
        };
        assert!(matches!(
            unknown.to_intent(&registry),
            Err(ServiceError::TokenNotFound(msg)) if msg.contains("Supported tokens")
        ));

        // ETH aliases WETH, so the pair collapses to a single token
        let same = ParsedInstruction {
            action: TradeAction::Sell,
            amount: "1".to_string(),
            token: "ETH".to_string(),
            using: "WETH".to_string(),
        };
        assert!(matches!(
            same.to_intent(&registry),
            Err(ServiceError::Parse(ParseCause::SchemaViolation(_)))
        ));
    }

    #[tokio::test]
    async fn test_parser_rejects_empty_text() {
        let result = parser(Ok("{}")).parse("   ", &CancellationToken::new()).await;
        assert!(matches!(result, Err(ServiceError::Parse(ParseCause::EmptyInput))));
    }

    #[tokio::test]
    async fn test_parser_reports_completion_failure() {
        let result = parser(Err(LlmError::Status {
            status: 503,
            body: "loading".to_string(),
        }))
        .parse("Buy 5 USDC using WETH", &CancellationToken::new())
        .await;

        assert!(matches!(
            result,
            Err(ServiceError::Parse(ParseCause::CompletionFailed(msg))) if msg.contains("503")
        ));
    }

    #[tokio::test]
    async fn test_parser_observes_cancellation() {
        let ct = CancellationToken::new();
        ct.cancel();

        let result = parser(Ok(r#"{"action": "buy", "amount": "5", "token": "USDC", "using": "WETH"}"#))
            .parse("Buy 5 USDC using WETH", &ct)
            .await;
        assert!(matches!(result, Err(ServiceError::Cancelled)));
    }
}
