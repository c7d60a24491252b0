//! Relay publishing over WebSockets.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{client_async, tungstenite::Message, WebSocketStream};
use url::Url;

use crate::event::Event;

/// Bound on each relay's publish attempt, connection excluded.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<Box<dyn AsyncReadWrite + Unpin + Send>>;

/// Result of a single relay attempt. One is produced per relay, in input
/// order; no variant affects the processing of later relays.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// The WebSocket connection could not be established.
    ConnectFailed { url: String, reason: String },
    /// Connected, but the relay rejected the event, misbehaved, or timed out.
    PublishFailed { url: String, reason: String },
    /// The relay acknowledged the event with the given status.
    Published { url: String, status: String },
}

/// Publish `ev` to each relay in order, one bounded attempt per relay,
/// reporting progress on the diagnostic stream.
pub async fn publish_all(ev: &Event, relays: &[String], socks: Option<&str>) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(relays.len());
    for url in relays {
        eprintln!("publishing to {url}...");
        let outcome = attempt(ev, url, socks, PUBLISH_TIMEOUT).await;
        match &outcome {
            Outcome::ConnectFailed { reason, .. } => eprintln!("failed to connect: {reason}"),
            Outcome::PublishFailed { reason, .. } => eprintln!("failed: {reason}"),
            Outcome::Published { status, .. } => eprintln!("{status}."),
        }
        outcomes.push(outcome);
    }
    outcomes
}

/// Run one connect-and-publish attempt against a single relay. The
/// connection is owned by this attempt and dropped on every exit path.
async fn attempt(ev: &Event, url: &str, socks: Option<&str>, limit: Duration) -> Outcome {
    let mut ws = match connect_ws(url, socks).await {
        Ok(ws) => ws,
        Err(e) => {
            return Outcome::ConnectFailed {
                url: url.into(),
                reason: e.to_string(),
            }
        }
    };
    let outcome = match timeout(limit, publish(&mut ws, ev)).await {
        Err(_) => Outcome::PublishFailed {
            url: url.into(),
            reason: "timed out".into(),
        },
        Ok(Err(e)) => Outcome::PublishFailed {
            url: url.into(),
            reason: e.to_string(),
        },
        Ok(Ok(status)) => Outcome::Published {
            url: url.into(),
            status,
        },
    };
    let _ = ws.close(None).await;
    outcome
}

/// Send the EVENT message and wait for the relay's matching OK. Unrelated
/// messages (NOTICE, stray OKs) are skipped.
async fn publish(ws: &mut Socket, ev: &Event) -> Result<String> {
    let msg = serde_json::json!(["EVENT", ev]);
    ws.send(Message::Text(msg.to_string())).await?;
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(txt) => {
                let Ok(val) = serde_json::from_str::<Value>(&txt) else {
                    continue;
                };
                let Some(arr) = val.as_array() else { continue };
                if arr.first().and_then(|v| v.as_str()) != Some("OK")
                    || arr.get(1).and_then(|v| v.as_str()) != Some(ev.id.as_str())
                {
                    continue;
                }
                let accepted = arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
                let message = arr.get(3).and_then(|v| v.as_str()).unwrap_or_default();
                if accepted {
                    return Ok(if message.is_empty() {
                        "success".into()
                    } else {
                        message.into()
                    });
                }
                bail!(
                    "{}",
                    if message.is_empty() {
                        "rejected by relay"
                    } else {
                        message
                    }
                );
            }
            Message::Close(_) => bail!("connection closed by relay"),
            _ => {}
        }
    }
    bail!("connection closed before OK")
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(relay: &str, socks: Option<&str>) -> Result<Socket> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use crate::sign;
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    fn signed_event() -> Event {
        let mut ev = Event {
            id: String::new(),
            pubkey: String::new(),
            kind: 1,
            created_at: 1700000000,
            tags: vec![Tag(vec!["t".into(), "test".into()])],
            content: "hello".into(),
            sig: String::new(),
        };
        sign::sign(&mut ev, sign::DEFAULT_SECRET_KEY).unwrap();
        ev
    }

    /// What the in-test relay replies after receiving an EVENT message.
    enum Reply {
        Ok { accepted: bool, message: &'static str },
        Notice,
        Close,
        Silence,
    }

    /// Accept one WebSocket connection, read the EVENT message, and answer
    /// according to `reply`. Returns the bound address.
    async fn spawn_relay(reply: Reply) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let id = match ws.next().await {
                Some(Ok(TMsg::Text(txt))) => {
                    let val: Value = serde_json::from_str(&txt).unwrap();
                    assert_eq!(val[0], "EVENT");
                    val[1]["id"].as_str().unwrap().to_string()
                }
                other => panic!("expected EVENT message, got {other:?}"),
            };
            match reply {
                Reply::Ok { accepted, message } => {
                    ws.send(TMsg::Text(
                        serde_json::json!(["OK", id, accepted, message]).to_string(),
                    ))
                    .await
                    .unwrap();
                }
                Reply::Notice => {
                    ws.send(TMsg::Text(
                        serde_json::json!(["NOTICE", "slow down"]).to_string(),
                    ))
                    .await
                    .unwrap();
                    ws.send(TMsg::Text(serde_json::json!(["OK", id, true, ""]).to_string()))
                        .await
                        .unwrap();
                }
                Reply::Close => {
                    let _ = ws.close(None).await;
                }
                Reply::Silence => {
                    // keep the connection open without answering
                    while ws.next().await.is_some() {}
                }
            }
            // drain until the client hangs up
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, TMsg::Close(_)) {
                    break;
                }
            }
        });
        addr
    }

    /// Bind a port and immediately release it so connections get refused.
    async fn dead_relay() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn acceptance_is_reported_as_published() {
        let ev = signed_event();
        let addr = spawn_relay(Reply::Ok {
            accepted: true,
            message: "",
        })
        .await;
        let url = format!("ws://{addr}");
        let outcomes = publish_all(&ev, &[url.clone()], None).await;
        assert_eq!(
            outcomes,
            vec![Outcome::Published {
                url,
                status: "success".into()
            }]
        );
    }

    #[tokio::test]
    async fn rejection_is_reported_with_the_relay_reason() {
        let ev = signed_event();
        let addr = spawn_relay(Reply::Ok {
            accepted: false,
            message: "blocked: no spam",
        })
        .await;
        let url = format!("ws://{addr}");
        let outcomes = publish_all(&ev, &[url.clone()], None).await;
        assert_eq!(
            outcomes,
            vec![Outcome::PublishFailed {
                url,
                reason: "blocked: no spam".into()
            }]
        );
    }

    #[tokio::test]
    async fn notices_are_skipped_while_waiting_for_ok() {
        let ev = signed_event();
        let addr = spawn_relay(Reply::Notice).await;
        let url = format!("ws://{addr}");
        let outcomes = publish_all(&ev, &[url.clone()], None).await;
        assert_eq!(
            outcomes,
            vec![Outcome::Published {
                url,
                status: "success".into()
            }]
        );
    }

    #[tokio::test]
    async fn connect_failure_does_not_stop_later_relays() {
        let ev = signed_event();
        let dead = format!("ws://{}", dead_relay().await);
        let live_addr = spawn_relay(Reply::Ok {
            accepted: true,
            message: "",
        })
        .await;
        let live = format!("ws://{live_addr}");
        let outcomes = publish_all(&ev, &[dead.clone(), live.clone()], None).await;
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            &outcomes[0],
            Outcome::ConnectFailed { url, .. } if *url == dead
        ));
        assert_eq!(
            outcomes[1],
            Outcome::Published {
                url: live,
                status: "success".into()
            }
        );
    }

    #[tokio::test]
    async fn closing_without_ok_is_a_publish_failure() {
        let ev = signed_event();
        let addr = spawn_relay(Reply::Close).await;
        let url = format!("ws://{addr}");
        let outcomes = publish_all(&ev, &[url], None).await;
        assert!(matches!(&outcomes[0], Outcome::PublishFailed { .. }));
    }

    #[tokio::test]
    async fn silent_relay_trips_the_deadline() {
        let ev = signed_event();
        let addr = spawn_relay(Reply::Silence).await;
        let url = format!("ws://{addr}");
        let outcome = attempt(&ev, &url, None, Duration::from_millis(100)).await;
        assert_eq!(
            outcome,
            Outcome::PublishFailed {
                url,
                reason: "timed out".into()
            }
        );
    }

    #[tokio::test]
    async fn unparseable_url_is_a_connect_failure() {
        let ev = signed_event();
        let outcomes = publish_all(&ev, &["not a url".into()], None).await;
        assert!(matches!(&outcomes[0], Outcome::ConnectFailed { .. }));
    }
}
