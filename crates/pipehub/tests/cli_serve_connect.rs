#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/pipehub-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_socket(path: &Path) {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= WAIT {
            panic!("socket {} never appeared", path.display());
        }
        thread::sleep(Duration::from_millis(25));
    }
}

/// Forward a child's stdout lines so tests can wait on them with a deadline.
fn line_channel(child: &mut Child) -> mpsc::Receiver<String> {
    let stdout = child.stdout.take().expect("stdout should be piped");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn wait_for_line(lines: &mpsc::Receiver<String>, needles: &[&str]) -> String {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match lines.recv_timeout(remaining) {
            Ok(line) if needles.iter().all(|n| line.contains(n)) => return line,
            Ok(_) => {}
            Err(err) => panic!("no line matching {needles:?}: {err}"),
        }
    }
}

fn wait_for_exit(child: &mut Child) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child should be waitable") {
            return status;
        }
        if start.elapsed() >= WAIT {
            let _ = child.kill();
            panic!("child did not exit in time");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn pipehub() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pipehub"));
    cmd.args(["--log-level", "error", "--format", "json"]);
    cmd
}

#[test]
fn serve_prints_client_messages_and_broadcasts_stdin() {
    let dir = unique_temp_dir("serve");
    let sock_path = dir.join("hub.sock");

    let mut server = pipehub()
        .arg("serve")
        .arg(&sock_path)
        .args(["--instances", "2"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");
    let server_lines = line_channel(&mut server);
    wait_for_socket(&sock_path);

    // One-shot sender: exits once its payload is written.
    let output = pipehub()
        .arg("connect")
        .arg(&sock_path)
        .args(["--data", "hello"])
        .stdin(Stdio::null())
        .output()
        .expect("connect should run");
    assert!(output.status.success());

    wait_for_line(&server_lines, &["\"event\":\"connected\"", "\"connection\":1"]);
    wait_for_line(&server_lines, &["\"event\":\"message\"", "\"payload\":\"hello\""]);
    wait_for_line(&server_lines, &["\"event\":\"disconnected\"", "\"messages\":1"]);

    // Listener: waits for one broadcast.
    let mut listener = pipehub()
        .arg("connect")
        .arg(&sock_path)
        .args(["--count", "1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .expect("listener should start");
    wait_for_line(&server_lines, &["\"event\":\"connected\"", "\"connection\":2"]);

    {
        let stdin = server.stdin.as_mut().expect("stdin should be piped");
        stdin.write_all(b"news\n").expect("stdin write");
        stdin.flush().expect("stdin flush");
    }

    let status = wait_for_exit(&mut listener);
    assert!(status.success());
    let output = listener.wait_with_output().expect("listener output");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"payload\":\"news\""), "got: {stdout}");

    // Closing stdin stops the server gracefully.
    drop(server.stdin.take());
    let status = wait_for_exit(&mut server);
    assert!(status.success());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn serve_ignoring_stdin_keeps_running() {
    let dir = unique_temp_dir("ignore-stdin");
    let sock_path = dir.join("hub.sock");

    let mut server = pipehub()
        .arg("serve")
        .arg(&sock_path)
        .arg("--ignore-stdin")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve should start");
    wait_for_socket(&sock_path);

    thread::sleep(Duration::from_millis(300));
    assert!(server.try_wait().expect("waitable").is_none());

    let output = pipehub()
        .arg("connect")
        .arg(&sock_path)
        .args(["--data", "still here"])
        .stdin(Stdio::null())
        .output()
        .expect("connect should run");
    assert!(output.status.success());

    let _ = server.kill();
    let _ = server.wait();
    let _ = std::fs::remove_dir_all(&dir);
}
