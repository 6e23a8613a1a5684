//! Over-the-air updates compatible with the `espota` uploader
//!
//! The uploader sends a UDP invitation `"<command> <port> <size> <md5>\n"`.
//! With a password set, the device answers `AUTH <nonce>` and expects
//! `"200 <cnonce> <response>\n"` where the response is
//! `md5(md5(password) ":" nonce ":" cnonce)` in lower-case hex. On success it
//! replies `OK`, connects back to the uploader on `<port>` and pulls the
//! image, acknowledging every chunk with its length in ASCII. `OK` on the TCP
//! stream confirms the image was accepted.
#![allow(async_fn_in_trait)]

use core::fmt::{self, Write};

use heapless::String;
use log::{info, warn};
use md5::{Digest, Md5};

use crate::traits::{OtaPort, Watchdog};

/// Invitation command codes
pub const CMD_FLASH: u16 = 0;
pub const CMD_SPIFFS: u16 = 100;
pub const CMD_AUTH: u16 = 200;

/// Largest TCP read while pulling the image
pub const CHUNK_SIZE: usize = 1460;

/// Failure categories reported to the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    Auth,
    Begin,
    Connect,
    Receive,
    End,
}

impl OtaError {
    pub fn code(&self) -> u8 {
        match self {
            Self::Auth => 0,
            Self::Begin => 1,
            Self::Connect => 2,
            Self::Receive => 3,
            Self::End => 4,
        }
    }
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "Auth Failed"),
            Self::Begin => write!(f, "Begin Failed"),
            Self::Connect => write!(f, "Connect Failed"),
            Self::Receive => write!(f, "Receive Failed"),
            Self::End => write!(f, "End Failed"),
        }
    }
}

impl core::error::Error for OtaError {}

/// Lifecycle of one update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaEvent {
    Start,
    Progress { done: u32, total: u32 },
    End,
    Error(OtaError),
}

/// Print an update event to the console
pub fn report(event: &OtaEvent) {
    match event {
        OtaEvent::Start => info!("Start"),
        OtaEvent::Progress { done, total } => info!("Progress: {}%", percent(*done, *total)),
        OtaEvent::End => info!("End"),
        OtaEvent::Error(e) => warn!("Error[{}]: {}", e.code(), e),
    }
}

pub fn percent(done: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    ((done as u64 * 100) / total as u64) as u32
}

/// Parsed invitation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub command: u16,
    /// Uploader port to pull the image from
    pub port: u16,
    pub size: u32,
    /// Expected image digest, lower-case hex
    pub md5: String<32>,
}

impl Invitation {
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let text = core::str::from_utf8(datagram).ok()?;
        let mut fields = text.split_ascii_whitespace();
        let command = fields.next()?.parse().ok()?;
        let port = fields.next()?.parse().ok()?;
        let size = fields.next()?.parse().ok()?;
        let digest = fields.next()?;
        if digest.len() != 32 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut md5 = String::new();
        for c in digest.chars() {
            md5.push(c.to_ascii_lowercase()).ok()?;
        }
        Some(Self {
            command,
            port,
            size,
            md5,
        })
    }
}

/// Lower-case hex MD5 over the concatenation of `parts`
pub fn md5_hex(parts: &[&[u8]]) -> String<32> {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hex(&hasher.finalize())
}

fn hex(digest: &[u8]) -> String<32> {
    let mut out = String::new();
    for byte in digest.iter().take(16) {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Challenge nonce derived from a device-local seed
pub fn nonce(seed: u64) -> String<32> {
    let mut decimal: String<20> = String::new();
    let _ = write!(decimal, "{}", seed);
    md5_hex(&[decimal.as_bytes()])
}

/// Response the uploader must send for `nonce` and its own `cnonce`
pub fn expected_response(password: &str, nonce: &str, cnonce: &str) -> String<32> {
    let password_md5 = md5_hex(&[password.as_bytes()]);
    md5_hex(&[
        password_md5.as_bytes(),
        b":",
        nonce.as_bytes(),
        b":",
        cnonce.as_bytes(),
    ])
}

/// Check an `"200 <cnonce> <response>"` datagram against our nonce
pub fn verify_auth(datagram: &[u8], password: &str, nonce: &str) -> bool {
    let Ok(text) = core::str::from_utf8(datagram) else {
        return false;
    };
    let mut fields = text.split_ascii_whitespace();
    let command = fields.next().and_then(|c| c.parse::<u16>().ok());
    let (Some(CMD_AUTH), Some(cnonce), Some(response)) = (command, fields.next(), fields.next())
    else {
        return false;
    };
    expected_response(password, nonce, cnonce).eq_ignore_ascii_case(response)
}

/// UDP exchange with the uploader that sent the invitation
pub trait Datagrams {
    async fn send(&mut self, payload: &[u8]) -> Result<(), OtaError>;

    /// Next datagram from the uploader, `None` on timeout
    async fn recv(&mut self, buf: &mut [u8]) -> Option<usize>;
}

/// Run the invitation handshake.
///
/// Replies `OK` when the uploader may proceed. The caller then connects back
/// and calls [`receive`].
pub async fn accept<D: Datagrams>(
    udp: &mut D,
    invitation: &Invitation,
    password: &str,
    seed: u64,
    capacity: u32,
) -> Result<(), OtaError> {
    if invitation.command != CMD_FLASH {
        warn!("unsupported update command {}", invitation.command);
        let _ = udp.send(b"ERR: unsupported command").await;
        return Err(OtaError::Begin);
    }

    if !password.is_empty() {
        let nonce = nonce(seed);
        let mut challenge: String<37> = String::new();
        let _ = write!(challenge, "AUTH {}", nonce);
        udp.send(challenge.as_bytes()).await?;

        let mut buf = [0u8; 128];
        let accepted = match udp.recv(&mut buf).await {
            Some(len) => verify_auth(&buf[..len], password, &nonce),
            None => false,
        };
        if !accepted {
            let _ = udp.send(b"Authentication Failed").await;
            return Err(OtaError::Auth);
        }
    }

    if invitation.size == 0 || invitation.size > capacity {
        warn!("image of {} bytes does not fit {} bytes", invitation.size, capacity);
        let _ = udp.send(b"ERR: image does not fit").await;
        return Err(OtaError::Begin);
    }

    udp.send(b"OK").await
}

/// TCP stream the image arrives on
pub trait ImageStream {
    /// Read up to `buf.len()` bytes, `Ok(0)` once the peer closed
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError>;

    async fn write_all(&mut self, data: &[u8]) -> Result<(), OtaError>;
}

/// Destination partition for the new image
pub trait FirmwareSink {
    fn capacity(&self) -> u32;

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), OtaError>;

    /// Mark the written image as the one to boot next
    fn commit(&mut self) -> Result<(), OtaError>;
}

/// Streaming size and digest check of an incoming image
pub struct Transfer {
    total: u32,
    done: u32,
    last_percent: Option<u32>,
    hasher: Md5,
}

impl Transfer {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            done: 0,
            last_percent: None,
            hasher: Md5::new(),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.total - self.done
    }

    pub fn done(&self) -> u32 {
        self.done
    }

    pub fn is_complete(&self) -> bool {
        self.done == self.total
    }

    /// Account for a chunk, returns a progress event when the percentage moved
    pub fn advance(&mut self, chunk: &[u8]) -> Result<Option<OtaEvent>, OtaError> {
        let len = u32::try_from(chunk.len()).map_err(|_| OtaError::Receive)?;
        if len > self.remaining() {
            return Err(OtaError::Receive);
        }
        self.hasher.update(chunk);
        self.done += len;

        let now = percent(self.done, self.total);
        if self.last_percent == Some(now) {
            return Ok(None);
        }
        self.last_percent = Some(now);
        Ok(Some(OtaEvent::Progress {
            done: self.done,
            total: self.total,
        }))
    }

    /// Compare the running digest with `expected`
    pub fn finish(self, expected: &str) -> Result<(), OtaError> {
        if !self.is_complete() {
            return Err(OtaError::End);
        }
        let digest = hex(&self.hasher.finalize());
        if digest.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            warn!("image digest {} does not match {}", digest, expected);
            Err(OtaError::End)
        }
    }
}

/// Pull the image announced by `invitation` into `sink`
pub async fn receive<S, F, W>(
    stream: &mut S,
    sink: &mut F,
    invitation: &Invitation,
    watchdog: &mut W,
) -> Result<(), OtaError>
where
    S: ImageStream,
    F: FirmwareSink,
    W: Watchdog,
{
    let mut transfer = Transfer::new(invitation.size);
    let mut buf = [0u8; CHUNK_SIZE];

    while !transfer.is_complete() {
        watchdog.feed();
        let want = (transfer.remaining() as usize).min(buf.len());
        let len = stream.read(&mut buf[..want]).await?;
        if len == 0 {
            warn!("uploader closed after {} bytes", transfer.done());
            return Err(OtaError::Receive);
        }
        sink.write(transfer.done(), &buf[..len])?;
        if let Some(event) = transfer.advance(&buf[..len])? {
            report(&event);
        }

        let mut ack: String<10> = String::new();
        let _ = write!(ack, "{}", len);
        watchdog.feed();
        stream.write_all(ack.as_bytes()).await?;
    }

    transfer.finish(&invitation.md5)?;
    sink.commit()?;
    watchdog.feed();
    stream.write_all(b"OK").await
}

/// OTA port for builds without update support
pub struct Disabled;

impl OtaPort for Disabled {
    async fn handle<W: Watchdog>(&mut self, _watchdog: &mut W) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use std::{cell::Cell, collections::VecDeque, rc::Rc};

    const IMAGE_MD5: &str = "0cc175b9c0f1b6a831c399e269772661"; // md5("a")

    #[test]
    fn parses_invitation() {
        let inv = Invitation::parse(b"0 43117 1 0CC175B9C0F1B6A831C399E269772661\n").unwrap();
        assert_eq!(inv.command, CMD_FLASH);
        assert_eq!(inv.port, 43117);
        assert_eq!(inv.size, 1);
        assert_eq!(inv.md5.as_str(), IMAGE_MD5);
    }

    #[test]
    fn rejects_malformed_invitation() {
        assert!(Invitation::parse(b"0 43117 1\n").is_none());
        assert!(Invitation::parse(b"0 port 1 0cc175b9c0f1b6a831c399e269772661").is_none());
        assert!(Invitation::parse(b"0 43117 1 0cc175b9").is_none());
    }

    #[test]
    fn md5_matches_reference() {
        assert_eq!(md5_hex(&[b"a"]).as_str(), IMAGE_MD5);
        assert_eq!(md5_hex(&[b"", b"a"]).as_str(), IMAGE_MD5);
        assert_eq!(md5_hex(&[]).as_str(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn auth_round_trip() {
        let nonce = nonce(1234);
        let cnonce = md5_hex(&[b"uploader"]);
        let response = expected_response("esp8266", &nonce, &cnonce);

        let mut datagram = std::string::String::from("200 ");
        datagram.push_str(&cnonce);
        datagram.push(' ');
        datagram.push_str(&response);
        datagram.push('\n');

        assert!(verify_auth(datagram.as_bytes(), "esp8266", &nonce));
        assert!(!verify_auth(datagram.as_bytes(), "wrong", &nonce));
        assert!(!verify_auth(b"100 a b", "esp8266", &nonce));
    }

    #[test]
    fn percent_handles_small_images() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(50, 50), 100);
    }

    #[test]
    fn progress_only_when_percent_moves() {
        let mut transfer = Transfer::new(1_000);
        assert_eq!(
            transfer.advance(&[0; 5]).unwrap(),
            Some(OtaEvent::Progress { done: 5, total: 1_000 })
        );
        assert_eq!(transfer.advance(&[0; 4]).unwrap(), None);
        assert!(transfer.advance(&[0; 1]).unwrap().is_some());
        assert_eq!(transfer.advance(&[0; 991]), Err(OtaError::Receive));
    }

    #[test]
    fn error_codes_and_messages() {
        assert_eq!(OtaError::Auth.code(), 0);
        assert_eq!(OtaError::End.code(), 4);
        assert_eq!(OtaError::Connect.to_string(), "Connect Failed");
    }

    #[derive(Default)]
    struct Uploader {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl Datagrams for Uploader {
        async fn send(&mut self, payload: &[u8]) -> Result<(), OtaError> {
            self.sent.push(payload.to_vec());
            Ok(())
        }

        async fn recv(&mut self, buf: &mut [u8]) -> Option<usize> {
            let next = self.inbox.pop_front()?;
            buf[..next.len()].copy_from_slice(&next);
            Some(next.len())
        }
    }

    fn invitation(size: u32) -> Invitation {
        let mut md5 = String::new();
        md5.push_str(IMAGE_MD5).unwrap();
        Invitation {
            command: CMD_FLASH,
            port: 43117,
            size,
            md5,
        }
    }

    #[test]
    fn accept_without_password() {
        let mut udp = Uploader::default();
        assert_eq!(block_on(accept(&mut udp, &invitation(1), "", 0, 4096)), Ok(()));
        assert_eq!(udp.sent, vec![b"OK".to_vec()]);
    }

    #[test]
    fn accept_with_password() {
        let nonce = nonce(99);
        let cnonce = "00112233445566778899aabbccddeeff";
        let response = expected_response("esp8266", &nonce, cnonce);
        let mut reply = format!("200 {} {}\n", cnonce, response).into_bytes();
        reply.truncate(128);

        let mut udp = Uploader::default();
        udp.inbox.push_back(reply);
        assert_eq!(
            block_on(accept(&mut udp, &invitation(1), "esp8266", 99, 4096)),
            Ok(())
        );
        assert_eq!(udp.sent.len(), 2);
        assert_eq!(udp.sent[0], format!("AUTH {}", nonce).into_bytes());
        assert_eq!(udp.sent[1], b"OK".to_vec());
    }

    #[test]
    fn accept_rejects_wrong_password_and_timeout() {
        let mut udp = Uploader::default();
        udp.inbox.push_back(b"200 aaaa bbbb\n".to_vec());
        assert_eq!(
            block_on(accept(&mut udp, &invitation(1), "esp8266", 1, 4096)),
            Err(OtaError::Auth)
        );
        assert_eq!(udp.sent.last().unwrap(), &b"Authentication Failed".to_vec());

        let mut silent = Uploader::default();
        assert_eq!(
            block_on(accept(&mut silent, &invitation(1), "esp8266", 1, 4096)),
            Err(OtaError::Auth)
        );
    }

    #[test]
    fn accept_rejects_oversized_and_filesystem_images() {
        let mut udp = Uploader::default();
        assert_eq!(
            block_on(accept(&mut udp, &invitation(8192), "", 0, 4096)),
            Err(OtaError::Begin)
        );

        let mut fs = invitation(1);
        fs.command = CMD_SPIFFS;
        assert_eq!(
            block_on(accept(&mut Uploader::default(), &fs, "", 0, 4096)),
            Err(OtaError::Begin)
        );
    }

    struct Stream {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl ImageStream for Stream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError> {
            match self.chunks.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }

        async fn write_all(&mut self, data: &[u8]) -> Result<(), OtaError> {
            self.written.extend_from_slice(data);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Partition {
        image: Vec<u8>,
        committed: bool,
    }

    impl FirmwareSink for Partition {
        fn capacity(&self) -> u32 {
            4096
        }

        fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), OtaError> {
            assert_eq!(offset as usize, self.image.len());
            self.image.extend_from_slice(data);
            Ok(())
        }

        fn commit(&mut self) -> Result<(), OtaError> {
            self.committed = true;
            Ok(())
        }
    }

    struct Dog;

    impl Watchdog for Dog {
        fn feed(&mut self) {}
    }

    fn image_invitation(image: &[u8]) -> Invitation {
        let digest = md5_hex(&[image]);
        let mut inv = invitation(image.len() as u32);
        inv.md5 = digest;
        inv
    }

    #[test]
    fn receives_and_acknowledges_chunks() {
        let image: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        let mut stream = Stream {
            chunks: image.chunks(1460).map(|c| c.to_vec()).collect(),
            written: Vec::new(),
        };
        let mut partition = Partition::default();

        let result = block_on(receive(
            &mut stream,
            &mut partition,
            &image_invitation(&image),
            &mut Dog,
        ));
        assert_eq!(result, Ok(()));
        assert_eq!(partition.image, image);
        assert!(partition.committed);
        assert_eq!(stream.written, b"1460146080OK".to_vec());
    }

    #[test]
    fn digest_mismatch_is_not_committed() {
        let image = b"firmware".to_vec();
        let mut inv = image_invitation(&image);
        inv.md5 = md5_hex(&[b"something else"]);
        let mut stream = Stream {
            chunks: VecDeque::from(vec![image]),
            written: Vec::new(),
        };
        let mut partition = Partition::default();

        let result = block_on(receive(&mut stream, &mut partition, &inv, &mut Dog));
        assert_eq!(result, Err(OtaError::End));
        assert!(!partition.committed);
    }

    #[test]
    fn early_close_is_a_receive_error() {
        let image = vec![7u8; 100];
        let mut stream = Stream {
            chunks: VecDeque::from(vec![image[..40].to_vec()]),
            written: Vec::new(),
        };
        let result = block_on(receive(
            &mut stream,
            &mut Partition::default(),
            &image_invitation(&image),
            &mut Dog,
        ));
        assert_eq!(result, Err(OtaError::Receive));
    }

    /// Every read and write blocks for a whole network timeout
    struct SlowStream {
        inner: Stream,
        unfed: Rc<Cell<u32>>,
        worst: u32,
    }

    impl SlowStream {
        fn wait(&mut self) {
            let waits = self.unfed.get() + 1;
            self.unfed.set(waits);
            self.worst = self.worst.max(waits);
        }
    }

    impl ImageStream for SlowStream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, OtaError> {
            self.wait();
            self.inner.read(buf).await
        }

        async fn write_all(&mut self, data: &[u8]) -> Result<(), OtaError> {
            self.wait();
            self.inner.write_all(data).await
        }
    }

    struct SharedDog(Rc<Cell<u32>>);

    impl Watchdog for SharedDog {
        fn feed(&mut self) {
            self.0.set(0);
        }
    }

    #[test]
    fn every_network_wait_gets_a_fresh_watchdog_period() {
        let image = vec![3u8; 3000];
        let unfed = Rc::new(Cell::new(0));
        let mut stream = SlowStream {
            inner: Stream {
                chunks: image.chunks(1000).map(|c| c.to_vec()).collect(),
                written: Vec::new(),
            },
            unfed: unfed.clone(),
            worst: 0,
        };

        let result = block_on(receive(
            &mut stream,
            &mut Partition::default(),
            &image_invitation(&image),
            &mut SharedDog(unfed),
        ));
        assert_eq!(result, Ok(()));
        assert_eq!(stream.worst, 1);
    }
}
