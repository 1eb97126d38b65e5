use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, EchoArgs};
use crate::exit::{io_error, CliResult, SUCCESS};
use crate::output::{print_listening, OutputFormat};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const CHUNK_SIZE: usize = 4096;

pub fn run(args: EchoArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = TcpListener::bind(&args.bind)
        .map_err(|err| io_error(&format!("bind {} failed", args.bind), err))?;
    let local = listener
        .local_addr()
        .map_err(|err| io_error("local address unavailable", err))?;
    // Non-blocking accept so Ctrl-C is noticed between connections.
    listener
        .set_nonblocking(true)
        .map_err(|err| io_error("listener setup failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    info!(address = %local, "echo server listening");
    print_listening(local, format);

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => spawn_session(stream, peer),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("accept failed", err)),
        }
    }

    Ok(SUCCESS)
}

fn spawn_session(stream: TcpStream, peer: SocketAddr) {
    let spawned = thread::Builder::new()
        .name(format!("echo-{peer}"))
        .spawn(move || match serve(stream, peer) {
            Ok(()) => info!(%peer, "peer disconnected"),
            Err(err) => warn!(%peer, error = %err, "echo session ended with error"),
        });

    if let Err(err) = spawned {
        warn!(%peer, error = %err, "failed to start echo session");
    }
}

fn serve(mut stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    info!(%peer, "peer connected");

    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };

        let chunk = String::from_utf8_lossy(&buf[..n]);
        debug!(%peer, size = n, "echoing chunk");
        stream.write_all(answer(&chunk).as_bytes())?;
        stream.flush()?;
    }
}

/// Reply for one received chunk. The chunk is embedded verbatim.
fn answer(chunk: &str) -> String {
    format!("<answer><note>You were sending</note><returning>{chunk}</returning></answer>\n")
}

#[cfg(test)]
mod tests {
    use xmlstream_client::Element;

    use super::*;

    #[test]
    fn answer_is_one_element_for_plain_text() {
        let element = Element::parse(&answer("hello")).expect("answer should parse");
        assert_eq!(element.name(), "answer");
        assert_eq!(
            element.find("returning").map(Element::text).as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn session_answers_each_chunk() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().expect("listener should have an address");
        let server = thread::spawn(move || {
            let (stream, peer) = listener.accept().expect("accept should succeed");
            serve(stream, peer)
        });

        let mut client = TcpStream::connect(addr).expect("connect should succeed");
        client.write_all(b"ping").expect("write should succeed");

        let expected = answer("ping");
        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).expect("reply should arrive");
        assert_eq!(reply, expected.as_bytes());

        drop(client);
        server
            .join()
            .expect("server should not panic")
            .expect("session should end cleanly");
    }
}
