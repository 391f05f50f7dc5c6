//! Webhook 签名
//!
//! 签名内容为 `"{timestamp}.{body}"`，HMAC-SHA256 后十六进制编码，头部格式 `sha256=<hex>`。
//! 接收方用同一密钥重算并常量时间比较，配合时间戳容差防重放。

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::WebhookEvent;
use crate::core::EventError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Bee-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Bee-Timestamp";
pub const EVENT_HEADER: &str = "X-Bee-Event";

/// 默认时间戳容差（秒）
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// 签名后的投递载荷：序列化后的信封 + 头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub body: String,
    pub signature: String,
    /// Unix 秒
    pub timestamp: i64,
    pub event_type: String,
}

impl SignedPayload {
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (SIGNATURE_HEADER, self.signature.clone()),
            (TIMESTAMP_HEADER, self.timestamp.to_string()),
            (EVENT_HEADER, self.event_type.clone()),
        ]
    }
}

fn keyed_mac(secret: &str, timestamp: i64, body: &str) -> Result<HmacSha256, EventError> {
    if secret.is_empty() {
        return Err(EventError::InvalidSecret);
    }
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| EventError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    Ok(mac)
}

/// 用当前时间签名
pub fn sign(event: &WebhookEvent, secret: &str) -> Result<SignedPayload, EventError> {
    sign_at(event, secret, chrono::Utc::now().timestamp())
}

/// 给定时间戳签名；相同输入得到相同签名
pub fn sign_at(
    event: &WebhookEvent,
    secret: &str,
    timestamp: i64,
) -> Result<SignedPayload, EventError> {
    let body = serde_json::to_string(event)?;
    let digest = keyed_mac(secret, timestamp, &body)?.finalize().into_bytes();
    let signature = format!("sha256={}", hex::encode(digest));
    Ok(SignedPayload {
        body,
        signature,
        timestamp,
        event_type: event.event_type.as_str().to_string(),
    })
}

/// 接收方校验：签名匹配（`verify_slice` 常量时间比较）且时间戳在容差内
pub fn verify_signature(
    body: &str,
    signature: &str,
    timestamp: i64,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> bool {
    if (now - timestamp).abs() > tolerance_secs {
        return false;
    }
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(provided) = hex::decode(hex_digest) else {
        return false;
    };
    keyed_mac(secret, timestamp, body)
        .map(|mac| mac.verify_slice(&provided).is_ok())
        .unwrap_or(false)
}
