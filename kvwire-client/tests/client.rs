use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use kvwire_client::{
    Client, ClientConfig, ClientError, Counter, Dialer, Link, Metrics, Reply, ReplyError, Stats,
    Timing, Transport,
};
use kvwire_server::TestServer;

fn client_with_addr(addr: &str, pool_size: usize) -> Client {
    let config = ClientConfig {
        addr: addr.to_string(),
        pool_size,
        timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    };
    Client::new(config)
}

fn bulk(data: &[u8]) -> Reply {
    Reply::Bulk(Some(Bytes::copy_from_slice(data)))
}

// ---------------------------------------------------------------------------
// Scripted peer: answers each command with a canned reply.
// ---------------------------------------------------------------------------

fn spawn_server(expected_commands: usize, handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream)) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn read_command(reader: &mut BufReader<TcpStream>) -> io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "digit"))
}

fn write_raw(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

// ---------------------------------------------------------------------------
// Transport double: in-memory links with scripted failures.
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Default)]
struct Script {
    fail_write: Option<io::ErrorKind>,
    fail_read: Option<io::ErrorKind>,
    fail_deadline: bool,
}

struct MockLink {
    script: Script,
    pending: VecDeque<u8>,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.script.fail_read.take() {
            self.pending.clear();
            return Err(io::Error::from(kind));
        }
        if self.pending.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.script.fail_write.take() {
            return Err(io::Error::from(kind));
        }
        self.pending.extend(b"+OK\r\n");
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Link for MockLink {
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        if self.script.fail_deadline {
            return Err(io::Error::new(io::ErrorKind::Other, "socket is gone"));
        }
        Ok(())
    }

    fn set_write_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out one scripted link per dial; unscripted dials behave normally.
#[derive(Default)]
struct MockDialer {
    dials: AtomicUsize,
    scripts: Mutex<VecDeque<Script>>,
}

impl MockDialer {
    fn with_scripts(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(MockDialer {
            dials: AtomicUsize::new(0),
            scripts: Mutex::new(scripts.into()),
        })
    }

    fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

impl Dialer for MockDialer {
    fn dial(&self, _addr: &str, _timeout: Duration) -> io::Result<Box<dyn Link>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(MockLink {
            script,
            pending: VecDeque::new(),
        }))
    }
}

fn mock_client(dialer: Arc<MockDialer>, config: ClientConfig) -> (Client, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    let client = Client::builder(config)
        .dialer(dialer)
        .stats(metrics.clone())
        .build();
    (client, metrics)
}

fn mock_config(pool_size: usize) -> ClientConfig {
    ClientConfig {
        addr: "mock:0".to_string(),
        pool_size,
        ..ClientConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Scripted peer tests
// ---------------------------------------------------------------------------

#[test]
fn client_set_get_roundtrip() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args, vec![b"SET".to_vec(), b"key".to_vec(), b"value".to_vec()]);
            write_raw(stream, b"+OK\r\n");
        } else {
            assert_eq!(args, vec![b"GET".to_vec(), b"key".to_vec()]);
            write_raw(stream, b"$5\r\nvalue\r\n");
        }
    });

    let client = client_with_addr(&addr, 1);
    let reply = client.call(&["SET".into(), "key".into(), b"value".into()]).expect("set");
    assert_eq!(reply, Reply::Simple(Bytes::from_static(b"OK")));
    let reply = client.call(&["GET".into(), "key".into()]).expect("get");
    assert_eq!(reply, bulk(b"value"));
}

#[test]
fn integer_arguments_are_sent_as_text() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args, vec![b"INCRBY".to_vec(), b"counter".to_vec(), b"-5".to_vec()]);
        write_raw(stream, b":-5\r\n");
    });

    let client = client_with_addr(&addr, 1);
    let reply = client.call(&["INCRBY".into(), "counter".into(), (-5i64).into()]).expect("incrby");
    assert_eq!(reply.as_i64(), Some(-5));
}

#[test]
fn server_error_is_returned_and_connection_reused() {
    let addr = spawn_server(2, |idx, _, stream| {
        if idx == 0 {
            write_raw(stream, b"-WRONGTYPE not a string\r\n");
        } else {
            write_raw(stream, b"+PONG\r\n");
        }
    });

    // The scripted peer accepts exactly one connection, so the second call
    // only succeeds if the first connection went back into the pool.
    let client = client_with_addr(&addr, 1);
    let err = client.call(&["GET".into(), "key".into()]).unwrap_err();
    match err {
        ClientError::Reply(ReplyError::Server(message)) => {
            assert_eq!(&message[..], b"WRONGTYPE not a string")
        }
        other => panic!("unexpected error: {}", other),
    }
    let reply = client.call(&["PING".into()]).expect("ping");
    assert_eq!(reply, Reply::Simple(Bytes::from_static(b"PONG")));
}

#[test]
fn array_with_nested_error_fails_the_call() {
    let addr = spawn_server(1, |_, _, stream| {
        write_raw(stream, b"*2\r\n-ERR first\r\n+OK\r\n");
    });

    let client = client_with_addr(&addr, 1);
    let err = client.call(&["EXEC".into()]).unwrap_err();
    assert!(matches!(err, ClientError::Reply(ReplyError::Server(ref m)) if &m[..] == b"ERR first"));
}

#[test]
fn unknown_marker_is_protocol_error() {
    let addr = spawn_server(1, |_, _, stream| {
        write_raw(stream, b"!oops\r\n");
    });

    let client = client_with_addr(&addr, 1);
    let err = client.call(&["PING".into()]).unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    assert!(!err.should_close());
}

#[test]
fn oversized_bulk_length_is_protocol_error() {
    let addr = spawn_server(1, |_, _, stream| {
        write_raw(stream, b"$9223372036854775807\r\nabc\r\n");
    });

    let client = client_with_addr(&addr, 1);
    let err = client.call(&["GET".into(), "huge".into()]).unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)), "unexpected error: {}", err);
    assert!(!err.should_close());
}

#[test]
fn unresponsive_peer_times_out_within_margin() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    // The kernel completes the handshake from the backlog; nobody ever answers.

    let timeout = Duration::from_micros(500);
    let client = Client::new(ClientConfig {
        addr,
        pool_size: 1,
        timeout,
        ..ClientConfig::default()
    });

    let start = Instant::now();
    let err = client.call(&["GET".into(), "foo".into()]).unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "expected timeout, got {}", err);
    assert!(elapsed < timeout + Duration::from_millis(500), "took {:?}", elapsed);
    drop(listener);
}

#[test]
fn dial_error_is_returned_and_slot_stays_usable() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let client = client_with_addr(&addr, 1);
    for _ in 0..2 {
        let err = client.call(&["PING".into()]).unwrap_err();
        assert!(matches!(err, ClientError::Dial { .. }), "unexpected error: {}", err);
    }
}

// ---------------------------------------------------------------------------
// Transport double tests
// ---------------------------------------------------------------------------

#[test]
fn zero_pool_size_fails_without_io() {
    let dialer = MockDialer::with_scripts(Vec::new());
    let (client, metrics) = mock_client(dialer.clone(), mock_config(0));

    for _ in 0..3 {
        let err = client.call(&["PING".into()]).unwrap_err();
        assert!(matches!(err, ClientError::PoolNotConfigured));
    }
    assert_eq!(dialer.dials(), 0);
    assert_eq!(metrics.snapshot().counter(Counter::AcquireError), 3);
}

#[test]
fn broken_pipe_forces_redial() {
    let dialer = MockDialer::with_scripts(vec![Script {
        fail_write: Some(io::ErrorKind::BrokenPipe),
        ..Script::default()
    }]);
    let (client, metrics) = mock_client(dialer.clone(), mock_config(1));

    let err = client.call(&["SET".into(), "k".into(), "v".into()]).unwrap_err();
    assert!(err.should_close());
    assert_eq!(dialer.dials(), 1);

    let reply = client.call(&["SET".into(), "k".into(), "v".into()]).expect("second call");
    assert_eq!(reply, Reply::Simple(Bytes::from_static(b"OK")));
    assert_eq!(dialer.dials(), 2);

    let snap = metrics.snapshot();
    assert_eq!(snap.counter(Counter::FatalClose), 1);
    assert_eq!(snap.counter(Counter::WriteError), 1);
    assert_eq!(snap.counter(Counter::NewConnection), 2);
}

#[test]
fn connection_reset_on_read_forces_redial() {
    let dialer = MockDialer::with_scripts(vec![Script {
        fail_read: Some(io::ErrorKind::ConnectionReset),
        ..Script::default()
    }]);
    let (client, metrics) = mock_client(dialer.clone(), mock_config(1));

    assert!(client.call(&["PING".into()]).is_err());
    client.call(&["PING".into()]).expect("redialed call");
    assert_eq!(dialer.dials(), 2);
    assert_eq!(metrics.snapshot().counter(Counter::ReadError), 1);
}

#[test]
fn timeout_keeps_connection_by_default() {
    let dialer = MockDialer::with_scripts(vec![Script {
        fail_read: Some(io::ErrorKind::WouldBlock),
        ..Script::default()
    }]);
    let (client, metrics) = mock_client(dialer.clone(), mock_config(1));

    let err = client.call(&["PING".into()]).unwrap_err();
    assert!(err.is_timeout());
    client.call(&["PING".into()]).expect("reused connection");
    assert_eq!(dialer.dials(), 1);
    assert_eq!(metrics.snapshot().counter(Counter::FatalClose), 0);
}

#[test]
fn timeout_discards_connection_when_configured() {
    let dialer = MockDialer::with_scripts(vec![Script {
        fail_read: Some(io::ErrorKind::WouldBlock),
        ..Script::default()
    }]);
    let mut config = mock_config(1);
    config.discard_on_timeout = true;
    let (client, metrics) = mock_client(dialer.clone(), config);

    assert!(client.call(&["PING".into()]).unwrap_err().is_timeout());
    client.call(&["PING".into()]).expect("redialed call");
    assert_eq!(dialer.dials(), 2);
    assert_eq!(metrics.snapshot().counter(Counter::FatalClose), 1);
}

#[test]
fn deadline_failure_discards_connection() {
    let dialer = MockDialer::with_scripts(vec![Script {
        fail_deadline: true,
        ..Script::default()
    }]);
    let (client, metrics) = mock_client(dialer.clone(), mock_config(1));

    let err = client.call(&["PING".into()]).unwrap_err();
    assert!(matches!(err, ClientError::Deadline(_)));
    client.call(&["PING".into()]).expect("redialed call");
    assert_eq!(dialer.dials(), 2);
    assert_eq!(metrics.snapshot().counter(Counter::DeadlineError), 1);
}

#[test]
fn every_call_reports_all_timings() {
    let dialer = MockDialer::with_scripts(Vec::new());
    let (client, metrics) = mock_client(dialer, mock_config(2));

    client.call(&["PING".into()]).expect("ping");
    client.call(&["PING".into()]).expect("ping");

    let snap = metrics.snapshot();
    for timing in Timing::ALL {
        assert_eq!(snap.timing(timing).unwrap().samples, 2, "{}", timing.name());
    }
    assert_eq!(snap.counter(Counter::NewConnection), 1);
}

#[test]
fn custom_stats_sink_sees_named_events() {
    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl Stats for Recorder {
        fn inc(&self, counter: Counter) {
            self.0.lock().unwrap().push(counter.name());
        }

        fn record(&self, timing: Timing, _elapsed: Duration) {
            self.0.lock().unwrap().push(timing.name());
        }
    }

    let recorder = Arc::new(Recorder::default());
    let client = Client::builder(mock_config(1))
        .dialer(MockDialer::with_scripts(Vec::new()))
        .stats(recorder.clone())
        .build();
    client.call(&["PING".into()]).expect("ping");

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            Timing::Acquire.name(),
            Counter::NewConnection.name(),
            Timing::Write.name(),
            Timing::Read.name(),
            Timing::Release.name(),
        ]
    );
}

// ---------------------------------------------------------------------------
// End-to-end against the emulated server
// ---------------------------------------------------------------------------

#[test]
fn end_to_end_set_get_missing() {
    let server = TestServer::start().expect("server");
    let client = client_with_addr(server.addr(), 4);

    let reply = client.call(&["SET".into(), "foo".into(), "bar".into()]).expect("set");
    assert_eq!(reply, Reply::Simple(Bytes::from_static(b"OK")));

    let reply = client.call(&["GET".into(), "foo".into()]).expect("get");
    assert_eq!(reply, bulk(b"bar"));

    let reply = client.call(&["GET".into(), "missing".into()]).expect("get missing");
    assert_eq!(reply, Reply::Bulk(None));
    assert!(reply.is_nil());
}

#[test]
fn end_to_end_arrays_and_binary_values() {
    let server = TestServer::start().expect("server");
    let client = client_with_addr(server.addr(), 1);

    let value = vec![0u8, 13, 10, 255];
    client.call(&["SET".into(), "bin".into(), (&value).into()]).expect("set");

    let reply = client.call(&["MGET".into(), "bin".into(), "nope".into()]).expect("mget");
    assert_eq!(reply.items().unwrap(), &[bulk(&value), Reply::Bulk(None)]);
    assert_eq!(reply.error(), None);
}

#[test]
fn end_to_end_echo_preserves_every_argument_form() {
    let server = TestServer::start().expect("server");
    let client = client_with_addr(server.addr(), 1);

    let owned = String::from("owned");
    let bytes = Bytes::from_static(b"\x00bytes");
    let cases: Vec<(kvwire_client::Arg<'_>, &str)> = vec![
        ("str".into(), "str"),
        ((&owned).into(), "owned"),
        ((&bytes).into(), "\x00bytes"),
        (42i64.into(), "42"),
        (u64::MAX.into(), "18446744073709551615"),
        ((-1i32).into(), "-1"),
    ];
    for (arg, expected) in cases {
        let reply = client.call(&["ECHO".into(), arg]).expect("echo");
        assert_eq!(reply, bulk(expected.as_bytes()));
    }
    assert_eq!(server.connections(), 1);
}

#[test]
fn pool_bounds_concurrent_calls() {
    let server = TestServer::start().expect("server");
    let client = Arc::new(client_with_addr(server.addr(), 2));
    let hold = Duration::from_millis(200);

    let start = Instant::now();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                client
                    .call(&["DEBUG".into(), "SLEEP".into(), "0.2".into()])
                    .expect("debug sleep");
                start.elapsed()
            })
        })
        .collect();
    let mut finished: Vec<Duration> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    finished.sort();

    // Two calls run side by side; the third waits for a released slot.
    assert!(finished[1] < hold * 2, "second call finished at {:?}", finished[1]);
    assert!(finished[2] >= hold * 2, "third call finished at {:?}", finished[2]);
    assert_eq!(server.connections(), 2);
}

#[test]
fn many_threads_share_one_client() {
    let server = TestServer::start().expect("server");
    let client = Arc::new(client_with_addr(server.addr(), 4));

    let handles: Vec<_> = (0..16)
        .map(|idx| {
            let client = client.clone();
            thread::spawn(move || {
                let key = format!("key-{}", idx);
                for round in 0..20u64 {
                    client
                        .call(&["SET".into(), (&key).into(), round.into()])
                        .expect("set");
                    let reply = client.call(&["GET".into(), (&key).into()]).expect("get");
                    assert_eq!(reply, bulk(round.to_string().as_bytes()));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(server.connections() <= 4);
}

#[cfg(unix)]
#[test]
fn end_to_end_over_unix_socket() {
    let path = std::env::temp_dir().join(format!(
        "kvwire-{}-{}.sock",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let _ = std::fs::remove_file(&path);
    let server = TestServer::start_unix(&path).expect("server");

    let client = Client::new(ClientConfig {
        addr: server.addr().to_string(),
        transport: Transport::Unix,
        pool_size: 1,
        timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    });
    client.call(&["SET".into(), "foo".into(), "bar".into()]).expect("set");
    let reply = client.call(&["GET".into(), "foo".into()]).expect("get");
    assert_eq!(reply, bulk(b"bar"));

    drop(server);
    let _ = std::fs::remove_file(&path);
}
