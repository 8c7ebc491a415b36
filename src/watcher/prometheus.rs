//! Prometheus query watcher
//!
//! Polls an instant-query expression on a fixed interval and turns the single
//! sample into an event. Failures are reported and polling carries on.

use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::ObservationSender;
use crate::domain::{ObservedError, ObservedEvent, Trigger};
use crate::error::{Result, SupervisorError};

pub const DEFAULT_PROMETHEUS_URL: &str = "http://localhost:9090";
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Extract the sample value from an instant-query response.
///
/// The response must have `status == "success"`, exactly one entry in
/// `data.result`, and a `[timestamp, "value"]` pair in that entry.
pub fn parse_query_response(body: &Value, expression: &str) -> Result<f64> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("");
    if status != "success" {
        return Err(SupervisorError::unexpected_response(
            expression,
            format!("non-success status ({}): {}", status, body),
        ));
    }

    let results = body
        .pointer("/data/result")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SupervisorError::unexpected_response(expression, format!("missing data.result: {}", body))
        })?;
    if results.len() != 1 {
        return Err(SupervisorError::unexpected_response(
            expression,
            format!("unexpectedly got {} results: {}", results.len(), body),
        ));
    }

    let pair = results[0]
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SupervisorError::unexpected_response(expression, format!("missing result value: {}", body))
        })?;
    if pair.len() != 2 {
        return Err(SupervisorError::unexpected_response(
            expression,
            format!("unexpectedly got {} values: {}", pair.len(), body),
        ));
    }

    let value = match &pair[1] {
        Value::String(raw) => raw.trim().parse::<f64>().map_err(|_| {
            SupervisorError::unexpected_response(expression, format!("value {:?} is not a number", raw))
        })?,
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            SupervisorError::unexpected_response(expression, format!("value {} is not a float", n))
        })?,
        other => {
            return Err(SupervisorError::unexpected_response(
                expression,
                format!("value {} is neither string nor number", other),
            ))
        }
    };

    if !value.is_finite() {
        return Err(SupervisorError::unexpected_response(
            expression,
            format!("value {} is not finite", value),
        ));
    }

    Ok(value)
}

/// Watches one PromQL expression
#[derive(Debug, Clone)]
pub struct PrometheusWatcher {
    unit: String,
    expression: String,
    server: String,
    trigger: Trigger,
    interval: Duration,
    client: reqwest::Client,
}

impl PrometheusWatcher {
    pub fn new(
        unit: &str,
        expression: &str,
        server: &str,
        trigger: Trigger,
        interval: Duration,
    ) -> Result<Self> {
        Self::with_timeout(unit, expression, server, trigger, interval, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_timeout(
        unit: &str,
        expression: &str,
        server: &str,
        trigger: Trigger,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            unit: unit.to_string(),
            expression: expression.to_string(),
            server: server.trim_end_matches('/').to_string(),
            trigger,
            interval,
            client,
        })
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn source(&self) -> String {
        format!("prometheus:{}", self.expression)
    }

    /// Poll forever at a fixed interval; only shutdown ends the loop.
    pub async fn watch(&self, sink: &ObservationSender, shutdown: &CancellationToken) {
        info!(
            unit = %self.unit,
            "Watching Prometheus expression {:?} on {} every {:?}",
            self.expression, self.server, self.interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(expression = %self.expression, "Prometheus watcher shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            let delivered = match self.poll().await {
                Ok(event) => sink.event(event),
                Err(e) => sink.error(ObservedError::from_error(self.source(), &e)),
            };
            if !delivered {
                debug!(expression = %self.expression, "Engine gone, stopping Prometheus watcher");
                return;
            }
        }
    }

    /// Run one query and build the event
    pub async fn poll(&self) -> Result<ObservedEvent> {
        let body = self.query().await?;
        let value = parse_query_response(&body, &self.expression)?;
        debug!(expression = %self.expression, value, "Prometheus sample");
        Ok(ObservedEvent::new(&self.unit, self.trigger, &self.expression, value))
    }

    async fn query(&self) -> Result<Value> {
        let url = format!("{}/api/v1/query", self.server);
        let response = self
            .client
            .get(&url)
            .query(&[("query", self.expression.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SupervisorError::QueryFailed {
                expression: self.expression.clone(),
                status: status.as_u16(),
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            SupervisorError::unexpected_response(
                &self.expression,
                format!("invalid JSON ({}): {}", e, text),
            )
        })
    }
}
