// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 agentflow contributors

//! Control channel to a running worker
//!
//! Messages are newline-delimited JSON written to the worker's control port
//! on the loopback interface.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::errors::{AgentflowError, AgentflowResult};

/// Messages understood by the worker's control port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Guidance for the running agent
    Message { content: String },
}

impl ControlMessage {
    /// Encode as one NDJSON line
    pub fn to_line(&self) -> AgentflowResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Deliver one message to `127.0.0.1:<port>`
pub async fn deliver(
    agent: &str,
    port: u16,
    message: &ControlMessage,
    timeout: Duration,
) -> AgentflowResult<()> {
    let line = message.to_line()?;
    let channel_error = |reason: String| AgentflowError::ControlChannel {
        agent: agent.to_string(),
        reason,
    };

    let send = async {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await
    };

    match tokio::time::timeout(timeout, send).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(channel_error(e.to_string())),
        Err(_) => Err(channel_error(format!("timed out after {:?}", timeout))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_message_wire_shape() {
        let line = ControlMessage::Message {
            content: "focus on auth".into(),
        }
        .to_line()
        .unwrap();

        assert_eq!(line, "{\"type\":\"message\",\"content\":\"focus on auth\"}\n");
    }

    #[tokio::test]
    async fn test_deliver_writes_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let reader = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            lines.next_line().await.unwrap()
        });

        let message = ControlMessage::Message {
            content: "hello".into(),
        };
        deliver("qa", port, &message, Duration::from_secs(2))
            .await
            .unwrap();

        let received = reader.await.unwrap().unwrap();
        let decoded: ControlMessage = serde_json::from_str(&received).unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn test_deliver_to_closed_port_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = deliver(
            "qa",
            port,
            &ControlMessage::Message { content: "x".into() },
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentflowError::ControlChannel { .. }));
    }
}
