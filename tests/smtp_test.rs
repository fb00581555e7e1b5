//! End-to-end delivery against a scripted SMTP server on the loopback
//! interface.

use std::time::Duration;

use integrations_email::{
    options, Auth, ClientOptions, EmailError, Message, Sender, SmtpClient, SmtpConfig, SmtpErrorKind,
    SmtpSender,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct Session {
    commands: Vec<String>,
    data: String,
}

/// Accepts one connection and answers like a small ESMTP server
/// advertising `extensions`.
async fn scripted_server(extensions: &'static [&'static str]) -> (String, JoinHandle<Session>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        run_session(stream, extensions).await
    });
    (addr, handle)
}

async fn run_session(stream: TcpStream, extensions: &[&str]) -> Session {
    let mut stream = BufReader::new(stream);
    let mut session = Session {
        commands: Vec::new(),
        data: String::new(),
    };
    reply(&mut stream, "220 mx.example.com ESMTP ready\r\n").await;

    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        let command = line.trim_end().to_string();
        session.commands.push(command.clone());

        match command.split(' ').next().unwrap_or("") {
            "EHLO" => {
                let mut response = String::from("250-mx.example.com\r\n");
                for (i, ext) in extensions.iter().enumerate() {
                    let sep = if i + 1 == extensions.len() { ' ' } else { '-' };
                    response.push_str(&format!("250{}{}\r\n", sep, ext));
                }
                reply(&mut stream, &response).await;
            }
            "AUTH" => reply(&mut stream, "235 2.7.0 Authentication successful\r\n").await,
            "MAIL" | "RCPT" => reply(&mut stream, "250 2.1.0 Ok\r\n").await,
            "DATA" => {
                reply(&mut stream, "354 End data with <CR><LF>.<CR><LF>\r\n").await;
                loop {
                    let mut data = String::new();
                    if stream.read_line(&mut data).await.unwrap() == 0 || data == ".\r\n" {
                        break;
                    }
                    session.data.push_str(&data);
                }
                reply(&mut stream, "250 2.0.0 Ok: queued as 4F2A\r\n").await;
            }
            "QUIT" => {
                reply(&mut stream, "221 2.0.0 Bye\r\n").await;
                break;
            }
            _ => reply(&mut stream, "502 5.5.2 Error: command not recognized\r\n").await,
        }
    }
    session
}

async fn reply(stream: &mut BufReader<TcpStream>, text: &str) {
    stream.get_mut().write_all(text.as_bytes()).await.unwrap();
}

fn client() -> SmtpClient {
    SmtpClient::new(ClientOptions {
        hello_name: "client.example.com".to_string(),
        connect_timeout: Duration::from_secs(5),
        command_timeout: Duration::from_secs(5),
    })
}

fn newsletter() -> Message {
    Message::new(
        "Newsletter <news@example.com>",
        "Weekly digest",
        [
            options::to(["reader@example.com"]),
            options::bcc(["archive@example.com"]),
            options::set_plain_from_string("This week:\n.hidden line\n"),
            options::set_html_from_string(
                "<p>This week</p><img src=\"cid:logo.png\">",
                [options::inline_from_bytes("logo.png", "image/png", b"\x89PNG")],
            ),
            options::attach_from_bytes("digest.csv", "text/csv", b"a,b\n1,2\n"),
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn test_plain_delivery_command_sequence() {
    let (addr, server) = scripted_server(&["PIPELINING", "AUTH PLAIN LOGIN"]).await;

    let sender = SmtpSender::with_delivery(
        addr,
        Auth::plain("", "news", "secret", "127.0.0.1"),
        client(),
    );
    sender.send(&newsletter()).await.unwrap();

    let session = server.await.unwrap();
    let verbs: Vec<_> = session
        .commands
        .iter()
        .map(|c| c.split(' ').take(2).collect::<Vec<_>>().join(" "))
        .collect();
    assert_eq!(
        verbs,
        [
            "EHLO client.example.com",
            "AUTH PLAIN",
            "MAIL FROM:<news@example.com>",
            "RCPT TO:<reader@example.com>",
            "RCPT TO:<archive@example.com>",
            "DATA",
            "QUIT",
        ]
    );

    let data = &session.data;
    assert!(data.contains("From: Newsletter <news@example.com>\r\n"));
    assert!(data.contains("To: reader@example.com\r\n"));
    assert!(data.contains("Subject: Weekly digest\r\n"));
    assert!(data.contains("MIME-Version: 1.0\r\n"));
    assert!(data.contains("multipart/mixed"));
    assert!(data.contains("multipart/related"));
    assert!(data.contains("Content-ID: <logo.png>"));
    assert!(data.contains("digest.csv"));
    assert!(!data.contains("archive@example.com"));
}

#[tokio::test]
async fn test_config_sender_in_clear_mode() {
    let (addr, server) = scripted_server(&["AUTH PLAIN", "8BITMIME"]).await;

    let config = SmtpConfig::builder()
        .server_addr(addr)
        .credentials("news", "secret")
        .use_clear(true)
        .build()
        .unwrap();
    let sender = config.new_sender().unwrap();
    sender.send(&newsletter()).await.unwrap();

    let session = server.await.unwrap();
    assert!(session
        .commands
        .contains(&"MAIL FROM:<news@example.com> BODY=8BITMIME".to_string()));
}

#[tokio::test]
async fn test_unreachable_server_reports_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let sender = SmtpSender::with_delivery(addr, Auth::plain("", "u", "p", "127.0.0.1"), client());
    match sender.send(&newsletter()).await.unwrap_err() {
        EmailError::Smtp(e) => assert_eq!(e.kind(), SmtpErrorKind::ConnectionRefused),
        other => panic!("unexpected error: {:?}", other),
    }
}
