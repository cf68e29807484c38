use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use server::frame;
use shared::{ServerMessage, DEFAULT_PORT};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let address = format!("127.0.0.1:{}", DEFAULT_PORT);
    let mut stream = TcpStream::connect(&address).await?;
    println!("Connected to {}", address);

    // Handshake
    let key = BASE64.encode(rand::random::<[u8; 16]>());
    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {address}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    // Read the response head, keeping any frame bytes that followed it
    let mut buf = Vec::new();
    let mut chunk = [0u8; 2048];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err("server closed during handshake".into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let status = head.lines().next().unwrap_or("");
    println!("Handshake response: {}", status);
    if !status.contains("101") {
        return Err("handshake refused".into());
    }
    buf.drain(..head_end);

    // Report a position and watch a few broadcasts come back
    let state = json!({
        "type": "state",
        "player": { "x": 120.0, "y": 80.0, "angle": 1.57, "hp": 95 },
        "bullets": [],
        "zombies": [],
    })
    .to_string();
    stream
        .write_all(&frame::encode_masked_frame(&state, rand::random()))
        .await?;
    println!("Sent state update");

    let mut seen = 0;
    while seen < 5 {
        while let Some(decoded) = frame::decode_frame(&buf)? {
            buf.drain(..decoded.consumed);
            let text = String::from_utf8(decoded.payload)?;
            let ServerMessage::World { id, world } = serde_json::from_str(&text)?;
            println!(
                "World for client {}: {} players, {} bullets, {} zombies",
                id,
                world.players.len(),
                world.bullets.len(),
                world.zombies.len()
            );
            seen += 1;
            if seen >= 5 {
                break;
            }
        }
        if seen >= 5 {
            break;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            println!("Server closed the connection");
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(())
}
