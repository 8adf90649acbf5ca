use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};

use super::{PlaybackSink, SinkError};

pub(crate) const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// One persistent connection to mpv's JSON IPC socket. Requests carry a
/// `request_id` and replies are matched on it; event lines are skipped.
pub(crate) struct MpvSink {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    next_request_id: u64,
}

impl MpvSink {
    pub(crate) fn connect(path: &Path, timeout: Duration) -> Result<Self, SinkError> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            next_request_id: 1,
        })
    }

    pub(crate) fn quit(&mut self) -> Result<(), SinkError> {
        self.request(json!(["quit"])).map(|_| ())
    }

    fn request(&mut self, command: Value) -> Result<Value, SinkError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut line = json!({ "command": command, "request_id": request_id }).to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        let mut buf = String::new();
        loop {
            buf.clear();
            if self.reader.read_line(&mut buf)? == 0 {
                return Err(SinkError::Protocol(
                    "player closed the control channel".to_string(),
                ));
            }
            let reply: Value = match serde_json::from_str(buf.trim()) {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::debug!("skipping unparseable mpv line: {err}");
                    continue;
                }
            };
            if reply.get("event").is_some() {
                continue;
            }
            if reply.get("request_id").and_then(Value::as_u64) != Some(request_id) {
                continue;
            }
            return match reply.get("error").and_then(Value::as_str) {
                Some("success") => Ok(reply.get("data").cloned().unwrap_or(Value::Null)),
                Some(error) => Err(SinkError::Rejected(error.to_string())),
                None => Err(SinkError::Protocol(format!("reply without status: {reply}"))),
            };
        }
    }

    fn integer_property(&mut self, name: &str) -> Result<i64, SinkError> {
        let data = self.request(json!(["get_property", name]))?;
        data.as_i64()
            .ok_or_else(|| SinkError::Protocol(format!("{name} is not an integer: {data}")))
    }
}

impl PlaybackSink for MpvSink {
    fn enqueue(&mut self, url: &str) -> Result<(), SinkError> {
        self.request(json!(["loadfile", url, "append-play"]))
            .map(|_| ())
    }

    fn dequeue_first(&mut self) -> Result<(), SinkError> {
        self.request(json!(["playlist-remove", 0])).map(|_| ())
    }

    fn playlist_length(&mut self) -> Result<usize, SinkError> {
        Ok(self.integer_property("playlist-count")?.max(0) as usize)
    }

    fn playback_position(&mut self) -> Result<Option<usize>, SinkError> {
        Ok(usize::try_from(self.integer_property("playlist-pos")?).ok())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;

    struct FakeMpv {
        path: PathBuf,
        received: Arc<Mutex<Vec<Value>>>,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl FakeMpv {
        /// Serves one connection; `reply` maps each request to the raw
        /// lines written back.
        fn spawn<F>(name: &str, reply: F) -> Self
        where
            F: Fn(&Value) -> Vec<String> + Send + 'static,
        {
            let path = std::env::temp_dir().join(format!(
                "reelstream-test-{}-{name}.sock",
                std::process::id()
            ));
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path).expect("bind fake mpv");
            let received = Arc::new(Mutex::new(Vec::new()));
            let received_clone = Arc::clone(&received);

            let handle = thread::spawn(move || {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let mut writer = stream.try_clone().expect("clone stream");
                let reader = BufReader::new(stream);
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    let request: Value = serde_json::from_str(&line).expect("valid json request");
                    received_clone
                        .lock()
                        .expect("lock received")
                        .push(request.clone());
                    for out in reply(&request) {
                        if writer.write_all(format!("{out}\n").as_bytes()).is_err() {
                            return;
                        }
                    }
                }
            });

            Self {
                path,
                received,
                handle: Some(handle),
            }
        }

        fn commands(&self) -> Vec<Value> {
            self.received
                .lock()
                .expect("lock received")
                .iter()
                .map(|request| request["command"].clone())
                .collect()
        }
    }

    impl Drop for FakeMpv {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn success(request: &Value, data: Value) -> String {
        json!({ "request_id": request["request_id"], "error": "success", "data": data })
            .to_string()
    }

    #[test]
    fn enqueue_and_dequeue_send_playlist_commands() {
        let fake = FakeMpv::spawn("commands", |request| vec![success(request, Value::Null)]);
        let mut sink = MpvSink::connect(&fake.path, COMMAND_TIMEOUT).expect("connect");
        sink.enqueue("https://cdn.test/a.mp4").expect("enqueue");
        sink.dequeue_first().expect("dequeue");

        assert_eq!(
            fake.commands(),
            vec![
                json!(["loadfile", "https://cdn.test/a.mp4", "append-play"]),
                json!(["playlist-remove", 0]),
            ]
        );
    }

    #[test]
    fn skips_events_and_stale_replies_before_matching_request() {
        let fake = FakeMpv::spawn("events", |request| {
            vec![
                r#"{"event":"start-file","playlist_entry_id":3}"#.to_string(),
                json!({ "request_id": 999, "error": "success", "data": 1 }).to_string(),
                success(request, json!(7)),
            ]
        });
        let mut sink = MpvSink::connect(&fake.path, COMMAND_TIMEOUT).expect("connect");

        assert_eq!(sink.playlist_length().expect("playlist-count"), 7);
    }

    fn property_reply(count: i64, pos: i64) -> impl Fn(&Value) -> Vec<String> + Send + 'static {
        move |request: &Value| {
            let data = match request["command"][1].as_str() {
                Some("playlist-count") => json!(count),
                Some("playlist-pos") => json!(pos),
                _ => Value::Null,
            };
            vec![success(request, data)]
        }
    }

    #[test]
    fn idle_player_with_full_playlist_has_no_position() {
        let fake = FakeMpv::spawn("idle", property_reply(15, -1));
        let mut sink = MpvSink::connect(&fake.path, COMMAND_TIMEOUT).expect("connect");

        assert_eq!(sink.playlist_length().expect("playlist-count"), 15);
        assert_eq!(sink.playback_position().expect("playlist-pos"), None);
    }

    #[test]
    fn playing_entry_index_is_reported() {
        let fake = FakeMpv::spawn("playing", property_reply(15, 4));
        let mut sink = MpvSink::connect(&fake.path, COMMAND_TIMEOUT).expect("connect");

        assert_eq!(sink.playback_position().expect("playlist-pos"), Some(4));
    }

    #[test]
    fn error_status_is_a_rejection() {
        let fake = FakeMpv::spawn("rejected", |request| {
            vec![
                json!({ "request_id": request["request_id"], "error": "property unavailable" })
                    .to_string(),
            ]
        });
        let mut sink = MpvSink::connect(&fake.path, COMMAND_TIMEOUT).expect("connect");

        match sink.playback_position() {
            Err(SinkError::Rejected(message)) => assert_eq!(message, "property unavailable"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn silent_player_times_out() {
        let fake = FakeMpv::spawn("silent", |_| Vec::new());
        let mut sink =
            MpvSink::connect(&fake.path, Duration::from_millis(50)).expect("connect");

        assert!(matches!(sink.playlist_length(), Err(SinkError::Timeout)));
    }

    #[test]
    fn connect_fails_without_listener() {
        let path = std::env::temp_dir().join(format!(
            "reelstream-test-{}-missing.sock",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        assert!(matches!(
            MpvSink::connect(&path, COMMAND_TIMEOUT),
            Err(SinkError::Io(_))
        ));
    }
}
