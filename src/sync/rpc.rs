// erpload/src/sync/rpc.rs
//! Just enough XML-RPC to drive the ERP server after a restore.

use reqwest::Client;
use std::time::Duration;

use crate::config::RpcConfig;
use crate::errors::{AppError, Result};
use crate::utils::progress::Reporter;
use crate::utils::retry::{BoundedRetry, Poll, RetryOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum XmlValue {
    Int(i64),
    Bool(bool),
    Str(String),
    /// Any other type; the caller only needs to know the call succeeded.
    Other,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn encode_value(value: &XmlValue) -> String {
    match value {
        XmlValue::Int(v) => format!("<value><int>{}</int></value>", v),
        XmlValue::Bool(v) => format!("<value><boolean>{}</boolean></value>", u8::from(*v)),
        XmlValue::Str(v) => format!("<value><string>{}</string></value>", escape(v)),
        XmlValue::Other => "<value><nil/></value>".to_string(),
    }
}

pub fn encode_call(method: &str, params: &[XmlValue]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\"?><methodCall><methodName>{}</methodName><params>",
        escape(method)
    );
    for param in params {
        body.push_str("<param>");
        body.push_str(&encode_value(param));
        body.push_str("</param>");
    }
    body.push_str("</params></methodCall>");
    body
}

fn decode_value(node: roxmltree::Node) -> XmlValue {
    let Some(typed) = node.children().find(|c| c.is_element()) else {
        // An untyped <value> is a string.
        return XmlValue::Str(node.text().unwrap_or_default().to_string());
    };
    let text = typed.text().unwrap_or_default().trim();
    match typed.tag_name().name() {
        "int" | "i4" | "i8" => text.parse().map(XmlValue::Int).unwrap_or(XmlValue::Other),
        "boolean" => XmlValue::Bool(text == "1"),
        "string" => XmlValue::Str(typed.text().unwrap_or_default().to_string()),
        _ => XmlValue::Other,
    }
}

/// Returns the single result value, or the fault as a `Linking` error.
pub fn parse_response(body: &str) -> Result<XmlValue> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| AppError::Linking(format!("invalid XML-RPC response: {}", e)))?;
    if let Some(fault) = doc.descendants().find(|n| n.has_tag_name("fault")) {
        let message = fault
            .descendants()
            .filter(|n| n.has_tag_name("member"))
            .find(|m| {
                m.children()
                    .any(|c| c.has_tag_name("name") && c.text() == Some("faultString"))
            })
            .and_then(|m| m.children().find(|c| c.has_tag_name("value")))
            .map(|v| match decode_value(v) {
                XmlValue::Str(s) => s,
                other => format!("{:?}", other),
            })
            .unwrap_or_else(|| "unknown fault".to_string());
        return Err(AppError::Linking(message.trim().to_string()));
    }
    doc.descendants()
        .find(|n| n.has_tag_name("param"))
        .and_then(|p| p.children().find(|c| c.has_tag_name("value")))
        .map(decode_value)
        .ok_or_else(|| AppError::Linking("XML-RPC response has no value".to_string()))
}

pub struct RpcClient {
    http: Client,
    base_url: String,
    user: String,
    password: String,
}

impl RpcClient {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    async fn call(&self, service: &str, method: &str, params: &[XmlValue]) -> Result<XmlValue> {
        let url = format!("{}/xmlrpc/{}", self.base_url, service);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(encode_call(method, params))
            .send()
            .await?
            .error_for_status()?;
        parse_response(&response.text().await?)
    }

    /// Logs in to `database`; returns the user id.
    pub async fn login(&self, database: &str) -> Result<i64> {
        let result = self
            .call(
                "common",
                "login",
                &[
                    XmlValue::Str(database.to_string()),
                    XmlValue::Str(self.user.clone()),
                    XmlValue::Str(self.password.clone()),
                ],
            )
            .await?;
        match result {
            XmlValue::Int(uid) => Ok(uid),
            _ => Err(AppError::Linking(format!(
                "login to {} as {} refused",
                database, self.user
            ))),
        }
    }

    async fn execute(&self, database: &str, uid: i64, model: &str, method: &str) -> Result<XmlValue> {
        self.call(
            "object",
            "execute",
            &[
                XmlValue::Str(database.to_string()),
                XmlValue::Int(uid),
                XmlValue::Str(self.password.clone()),
                XmlValue::Str(model.to_string()),
                XmlValue::Str(method.to_string()),
            ],
        )
        .await
    }

    pub async fn connect(&self, database: &str, uid: i64) -> Result<()> {
        self.execute(database, uid, "sync.client.sync_server_connection", "connect")
            .await
            .map(|_| ())
    }

    pub async fn trigger_sync(&self, database: &str, uid: i64) -> Result<()> {
        self.execute(database, uid, "sync.client.entity", "sync").await.map(|_| ())
    }

    pub async fn trigger_upgrade(&self, database: &str, uid: i64) -> Result<()> {
        self.execute(database, uid, "sync_client.upgrade", "do_upgrade")
            .await
            .map(|_| ())
    }

    /// Waits for the server to accept a login on `database`.
    pub async fn wait_for_login(&self, database: &str, retry: &BoundedRetry) -> Result<i64> {
        let outcome = retry
            .run(|_| async move {
                match self.login(database).await {
                    Ok(uid) => Poll::Ready(uid),
                    Err(AppError::Http(e)) if e.is_connect() || e.is_timeout() => {
                        Poll::Pending(format!("server not reachable: {}", e))
                    }
                    Err(e) => Poll::Failed(e),
                }
            })
            .await;
        match outcome {
            RetryOutcome::Done(uid) => Ok(uid),
            RetryOutcome::Failed(e) => Err(e),
            RetryOutcome::TimedOut {
                attempts,
                elapsed,
                last_status,
            } => Err(AppError::Linking(format!(
                "gave up on {} after {} attempts ({:?}): {}",
                database, attempts, elapsed, last_status
            ))),
        }
    }
}

/// Logs in to each instance and asks it to connect, sync and optionally
/// upgrade. Failures are reported per instance.
pub async fn follow_up(
    config: &RpcConfig,
    databases: &[String],
    reporter: &Reporter,
) -> Vec<(String, AppError)> {
    let mut failures = Vec::new();
    let client = match RpcClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            reporter.say(format!("Cannot reach the ERP server: {}", e));
            return databases
                .iter()
                .map(|db| (db.clone(), AppError::Linking(e.to_string())))
                .collect();
        }
    };
    let retry = BoundedRetry::new(
        config.wait_attempts,
        Duration::from_secs(config.wait_seconds),
        Duration::from_secs(10),
    );

    for database in databases {
        let result = async {
            let uid = client.wait_for_login(database, &retry).await?;
            client.connect(database, uid).await?;
            reporter.say(format!("{}: connected to the sync server", database));
            if config.trigger_sync {
                client.trigger_sync(database, uid).await?;
                reporter.say(format!("{}: synchronization done", database));
            }
            if config.trigger_upgrade {
                client.trigger_upgrade(database, uid).await?;
                reporter.say(format!("{}: upgrade started", database));
            }
            Ok::<(), AppError>(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("{}: RPC follow-up failed: {}", database, e);
            reporter.say(format!("{}: {}", database, e));
            failures.push((database.clone(), e));
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_encoding_escapes_strings() {
        let body = encode_call(
            "login",
            &[XmlValue::Str("HQ_OCA".into()), XmlValue::Str("a<b&c".into()), XmlValue::Int(3)],
        );
        assert!(body.contains("<methodName>login</methodName>"));
        assert!(body.contains("<string>a&lt;b&amp;c</string>"));
        assert!(body.contains("<int>3</int>"));
    }

    #[test]
    fn response_values_are_decoded() {
        let ok = "<?xml version='1.0'?><methodResponse><params><param>\
                  <value><int>1</int></value></param></params></methodResponse>";
        assert_eq!(parse_response(ok).unwrap(), XmlValue::Int(1));

        let refused = "<methodResponse><params><param><value><boolean>0</boolean></value>\
                       </param></params></methodResponse>";
        assert_eq!(parse_response(refused).unwrap(), XmlValue::Bool(false));

        let untyped = "<methodResponse><params><param><value>ok</value></param></params></methodResponse>";
        assert_eq!(parse_response(untyped).unwrap(), XmlValue::Str("ok".into()));
    }

    #[test]
    fn faults_become_linking_errors() {
        let fault = "<methodResponse><fault><value><struct>\
            <member><name>faultCode</name><value><int>1</int></value></member>\
            <member><name>faultString</name><value><string>AccessDenied</string></value></member>\
            </struct></value></fault></methodResponse>";
        match parse_response(fault) {
            Err(AppError::Linking(message)) => assert_eq!(message, "AccessDenied"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
