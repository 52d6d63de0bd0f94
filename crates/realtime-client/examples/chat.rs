//! Join a channel, send one message and print everything that arrives.
//!
//! ```sh
//! cargo run -p realtime-client --example chat -- <ADDRESS> <CHANNEL> [TEXT]
//! ```
//!
//! The access token is read from `REALTIME_TOKEN` if set. Pass
//! `REALTIME_FORMAT=msgpack` to switch to binary frames. Message payloads are
//! printed to stdout (pipe to `jq` for formatting); lifecycle events go to
//! stderr.

use realtime_client::{Client, ClientConfig, Codec, Credentials, Event};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let address = args
        .first()
        .ok_or("usage: chat <ADDRESS> <CHANNEL> [TEXT]")?;
    let channel = args
        .get(1)
        .ok_or("usage: chat <ADDRESS> <CHANNEL> [TEXT]")?;
    let text = args.get(2).cloned().unwrap_or_else(|| "hello".to_string());

    let mut config = ClientConfig::new(address.as_str());
    if let Ok(token) = std::env::var("REALTIME_TOKEN") {
        config.credentials = Some(Credentials::Token(token));
    }
    if std::env::var("REALTIME_FORMAT").as_deref() == Ok("msgpack") {
        config.codec = Codec::MessagePack;
    }

    let client = Client::new(config)?;
    let mut events = client.events();

    eprintln!("connecting to {address} ...");
    client.connect().await?;
    client.join(channel.as_str()).await?;

    let ack = client
        .send("chat", serde_json::json!({ "channel": channel, "text": text }))
        .await?;
    eprintln!("[sent] id={}", ack.id);

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    Event::Message(msg) => {
                        eprintln!(
                            "[message] type={} channel={} id={}",
                            msg.kind,
                            msg.channel.as_deref().unwrap_or("-"),
                            msg.id.as_deref().unwrap_or("-"),
                        );
                        println!("{}", msg.payload);
                    }
                    Event::Connected => eprintln!("[connected]"),
                    Event::Disconnected { reason } => {
                        eprintln!("[disconnected] {}", reason.as_deref().unwrap_or("-"));
                    }
                    Event::Reconnecting { attempt, delay } => {
                        eprintln!("[reconnecting] attempt={attempt} in {}ms", delay.as_millis());
                    }
                    Event::ReconnectExhausted { attempts } => {
                        eprintln!("[gave up] after {attempts} attempts");
                        break;
                    }
                    Event::ServerError { code, message, retryable } => {
                        eprintln!("[error] code={code} retryable={retryable} {message}");
                    }
                    Event::ProtocolError { message } => eprintln!("[protocol] {message}"),
                    Event::JoinFailed { channel, reason } => {
                        eprintln!("[join failed] {channel}: {reason}");
                    }
                    Event::Closed => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("closing ...");
                client.disconnect().await?;
                break;
            }
        }
    }

    Ok(())
}
