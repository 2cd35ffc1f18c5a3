//! ProcessSupervisor - 切り離した実行を起動し、出力を分岐し、終わり方を報告する
//!
//! # 流れ
//! 1. 起動前に `stdout.log` / `stderr.log` を開く（create + append）。書けない
//!    ファイルは黙って失われるのではなく起動エラーになる。
//! 2. 独立したプロセスグループで起動。stdin は閉じ、出力は両方 pipe。
//! 3. ストリームごとに pump 1 本: 1 行読み、ファイルに追記し、flush して *から*
//!    event sink に渡す。ディスクに載る前に配信される行は無い。
//! 4. watcher が終了ステータスと両 pump の排出完了を待ち、`ProcessOutcome` を
//!    ちょうど 1 回届ける。
//! 5. `SupervisedProcess::kill` は watcher にプロセスグループ全体の kill を頼む。
//!    排出が終われば終了結果はやはり届く。
//!
//! ここではタスクストアに触れない。状態遷移は呼び出し側の責務。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::classifier::StreamClassifier;
use crate::domain::{LogLine, OrchestratorError, ProcessOutcome, StreamKind, TaskId};
use crate::ports::{Clock, EventSink};

/// 何を実行し、出力をどこへ書くか
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub task_id: TaskId,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// 継承した環境変数に追加する
    pub env: BTreeMap<String, String>,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

/// 実行中プロセスのハンドル
#[derive(Debug)]
pub struct SupervisedProcess {
    pub pid: u32,
    terminal: oneshot::Receiver<ProcessOutcome>,
    kill: Option<oneshot::Sender<()>>,
}

impl SupervisedProcess {
    /// プロセスが終了し、出力がすべて永続化されたら解決する
    pub async fn wait(self) -> ProcessOutcome {
        self.terminal.await.unwrap_or_else(|_| {
            ProcessOutcome::Errored("supervisor stopped before the process ended".into())
        })
    }

    /// プロセスとそれが起動したものすべてを kill する。続けて `wait` を呼ぶ。
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    classifier: Option<StreamClassifier>,
    grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            classifier: None,
            grace: Duration::ZERO,
        }
    }

    /// 配信時に情報系の stderr 行を付け替える
    pub fn with_classifier(mut self, classifier: StreamClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// spawn 成功後、報告する前に待つ時間
    pub fn with_spawn_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub async fn supervise(&self, spec: ProcessSpec) -> Result<SupervisedProcess, OrchestratorError> {
        let stdout_file = open_log(&spec.stdout_log).await?;
        let stderr_file = open_log(&spec.stderr_log).await?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| OrchestratorError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let Some(pid) = child.id() else {
            return Err(OrchestratorError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::other("process exited before a pid was observed"),
            });
        };
        info!(task_id = %spec.task_id, pid, program = %spec.program, "process started");

        let stdout_pump = child.stdout.take().map(|out| {
            tokio::spawn(
                self.line_sink(spec.task_id.clone(), StreamKind::Stdout)
                    .pump(out, stdout_file),
            )
        });
        let stderr_pump = child.stderr.take().map(|err| {
            tokio::spawn(
                self.line_sink(spec.task_id.clone(), StreamKind::Stderr)
                    .pump(err, stderr_file),
            )
        });

        let (tx, rx) = oneshot::channel();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let task_id = spec.task_id.clone();
        tokio::spawn(async move {
            // ハンドルが drop されると kill 分岐は無効になる。発火するのは明示的な kill だけ。
            let exited = tokio::select! {
                waited = child.wait() => Some(waited),
                Ok(()) = &mut kill_rx => None,
            };
            let waited = match exited {
                Some(waited) => waited,
                None => {
                    warn!(%task_id, pid, "killing process group");
                    kill_group(&mut child, pid);
                    child.wait().await
                }
            };
            for pump in [stdout_pump, stderr_pump].into_iter().flatten() {
                if let Err(e) = pump.await {
                    warn!(%task_id, error = %e, "output pump panicked");
                }
            }
            let outcome = classify_exit(waited);
            info!(%task_id, pid, ?outcome, "process ended");
            // receiver が消えた = 誰も終了結果を待っていない
            let _ = tx.send(outcome);
        });

        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }
        Ok(SupervisedProcess {
            pid,
            terminal: rx,
            kill: Some(kill_tx),
        })
    }

    fn line_sink(&self, task_id: TaskId, origin: StreamKind) -> LineSink {
        LineSink {
            task_id,
            origin,
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
            classifier: self.classifier.clone(),
        }
    }
}

/// 1 ストリームの出力先: まずログファイル、次に event sink
struct LineSink {
    task_id: TaskId,
    origin: StreamKind,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    classifier: Option<StreamClassifier>,
}

impl LineSink {
    async fn pump<R>(self, reader: R, mut file: File)
    where
        R: AsyncRead + Unpin,
    {
        let task_id = &self.task_id;
        let origin = self.origin;
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut persist_ok = true;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(%task_id, stream = %origin, error = %e, "read failed; stopping pump");
                    break;
                }
            }
            let content = line_text(&buf);

            if persist_ok && let Err(e) = append_line(&mut file, &content).await {
                error!(%task_id, stream = %origin, error = %e, "log write failed; live output stops");
                persist_ok = false;
            }
            // 永続化できなくなっても pipe は読み続ける
            if !persist_ok {
                continue;
            }

            let stream = match &self.classifier {
                Some(c) => c.classify(origin, &content),
                None => origin,
            };
            self.sink
                .publish_log(LogLine {
                    task_id: task_id.clone(),
                    stream,
                    content,
                    timestamp: self.clock.now(),
                })
                .await;
        }
        debug!(%task_id, stream = %origin, "pump finished");
    }
}

async fn open_log(path: &std::path::Path) -> Result<File, OrchestratorError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| OrchestratorError::io(format!("open {}", path.display()), e))
}

async fn append_line(file: &mut File, content: &str) -> std::io::Result<()> {
    file.write_all(content.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

/// 生の 1 行をデコード: lossy UTF-8、末尾の `\n` / `\r\n` を除去
fn line_text(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(unix)]
fn kill_group(child: &mut Child, pid: u32) {
    // 子プロセスは自分のグループのリーダー（process_group(0)）なので pid = pgid
    // SAFETY: killpg にメモリ安全性の前提条件は無い
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let e = std::io::Error::last_os_error();
        warn!(pid, error = %e, "killpg failed; killing the leader only");
        if let Err(e) = child.start_kill() {
            warn!(pid, error = %e, "kill failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child, pid: u32) {
    if let Err(e) = child.start_kill() {
        warn!(pid, error = %e, "kill failed");
    }
}

fn classify_exit(waited: std::io::Result<ExitStatus>) -> ProcessOutcome {
    match waited {
        Ok(status) => match status.code() {
            Some(code) => ProcessOutcome::Exited(code),
            None => ProcessOutcome::Errored(signal_message(&status)),
        },
        Err(e) => ProcessOutcome::Errored(format!("wait failed: {e}")),
    }
}

#[cfg(unix)]
fn signal_message(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("process terminated by signal {sig}"),
        None => "process terminated without an exit code".into(),
    }
}

#[cfg(not(unix))]
fn signal_message(_status: &ExitStatus) -> String {
    "process terminated without an exit code".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;
    use async_trait::async_trait;
    use rstest::rstest;
    use tokio::sync::Mutex;

    #[rstest]
    #[case::lf(b"hello\n", "hello")]
    #[case::crlf(b"hello\r\n", "hello")]
    #[case::no_newline(b"tail", "tail")]
    #[case::empty_line(b"\n", "")]
    fn line_text_strips_terminator(#[case] raw: &[u8], #[case] expected: &str) {
        assert_eq!(line_text(raw), expected);
    }

    #[test]
    fn line_text_is_lossy() {
        assert_eq!(line_text(b"a\xffb\n"), "a\u{fffd}b");
    }

    /// 全行を記録し、publish 時点でファイルに既に書かれているかを確認する
    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<LogLine>>,
        files: Mutex<Option<(PathBuf, PathBuf)>>,
        persisted_first: Mutex<bool>,
    }

    #[async_trait]
    impl EventSink for Recorder {
        async fn publish_log(&self, line: LogLine) {
            if let Some((out, err)) = self.files.lock().await.clone() {
                let path = match line.stream {
                    StreamKind::Stdout => out,
                    StreamKind::Stderr => err,
                };
                let on_disk = std::fs::read_to_string(path).unwrap_or_default();
                if !on_disk.lines().any(|l| l == line.content) {
                    *self.persisted_first.lock().await = false;
                }
            }
            self.lines.lock().await.push(line);
        }

        async fn publish_status(&self, _update: crate::domain::StatusUpdate) {}
    }

    fn spec(dir: &std::path::Path, script: &str) -> ProcessSpec {
        ProcessSpec {
            task_id: TaskId::parse("sup-1").unwrap(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            cwd: dir.to_path_buf(),
            env: BTreeMap::from([("TUNER_GREETING".to_string(), "hi".to_string())]),
            stdout_log: dir.join("stdout.log"),
            stderr_log: dir.join("stderr.log"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lines_are_persisted_then_published() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = Arc::new(Recorder::default());
        *sink.persisted_first.lock().await = true;
        *sink.files.lock().await = Some((tmp.path().join("stdout.log"), tmp.path().join("stderr.log")));
        let supervisor = ProcessSupervisor::new(sink.clone(), Arc::new(SystemClock));

        let handle = supervisor
            .supervise(spec(tmp.path(), "echo one; echo $TUNER_GREETING; echo oops >&2"))
            .await
            .unwrap();
        assert!(handle.pid > 0);
        assert_eq!(handle.wait().await, ProcessOutcome::Exited(0));

        let stdout = std::fs::read_to_string(tmp.path().join("stdout.log")).unwrap();
        let stderr = std::fs::read_to_string(tmp.path().join("stderr.log")).unwrap();
        assert_eq!(stdout, "one\nhi\n");
        assert_eq!(stderr, "oops\n");

        let lines = sink.lines.lock().await;
        let stdout_lines: Vec<_> = lines
            .iter()
            .filter(|l| l.stream == StreamKind::Stdout)
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(stdout_lines, vec!["one", "hi"]);
        assert!(lines.iter().any(|l| l.stream == StreamKind::Stderr && l.content == "oops"));
        assert!(*sink.persisted_first.lock().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor =
            ProcessSupervisor::new(Arc::new(crate::ports::NoopEventSink), Arc::new(SystemClock));
        let handle = supervisor.supervise(spec(tmp.path(), "exit 3")).await.unwrap();
        assert_eq!(handle.wait().await, ProcessOutcome::Exited(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn signal_is_an_errored_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor =
            ProcessSupervisor::new(Arc::new(crate::ports::NoopEventSink), Arc::new(SystemClock));
        let handle = supervisor.supervise(spec(tmp.path(), "kill -9 $$")).await.unwrap();
        match handle.wait().await {
            ProcessOutcome::Errored(msg) => assert!(msg.contains("signal 9"), "{msg}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_takes_down_the_whole_group() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor =
            ProcessSupervisor::new(Arc::new(crate::ports::NoopEventSink), Arc::new(SystemClock));
        // バックグラウンドの sleep が pipe を開いたままにする。グループ kill でしか排出されない
        let mut handle = supervisor
            .supervise(spec(tmp.path(), "sleep 30 & echo started; wait"))
            .await
            .unwrap();
        handle.kill();
        let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .expect("killed process did not finish");
        match outcome {
            ProcessOutcome::Errored(msg) => assert!(msg.contains("signal 9"), "{msg}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_the_kill_switch_lets_the_process_run() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor =
            ProcessSupervisor::new(Arc::new(crate::ports::NoopEventSink), Arc::new(SystemClock));
        let handle = supervisor
            .supervise(spec(tmp.path(), "sleep 0.2; exit 5"))
            .await
            .unwrap();
        assert_eq!(handle.wait().await, ProcessOutcome::Exited(5));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor =
            ProcessSupervisor::new(Arc::new(crate::ports::NoopEventSink), Arc::new(SystemClock));
        let mut s = spec(tmp.path(), "");
        s.program = "/definitely/not/a/program".into();
        let err = supervisor.supervise(s).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn classifier_relabels_broadcast_but_not_file() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = Arc::new(Recorder::default());
        let supervisor = ProcessSupervisor::new(sink.clone(), Arc::new(SystemClock))
            .with_classifier(StreamClassifier::default());

        let handle = supervisor
            .supervise(spec(tmp.path(), "echo 'INFO trial 1' >&2; echo 'ERROR boom' >&2"))
            .await
            .unwrap();
        handle.wait().await;

        let stderr = std::fs::read_to_string(tmp.path().join("stderr.log")).unwrap();
        assert_eq!(stderr, "INFO trial 1\nERROR boom\n");

        let lines = sink.lines.lock().await;
        let kinds: Vec<_> = lines.iter().map(|l| (l.content.as_str(), l.stream)).collect();
        assert!(kinds.contains(&("INFO trial 1", StreamKind::Stdout)));
        assert!(kinds.contains(&("ERROR boom", StreamKind::Stderr)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn appends_to_existing_logs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("stdout.log"), "earlier\n").unwrap();
        let supervisor =
            ProcessSupervisor::new(Arc::new(crate::ports::NoopEventSink), Arc::new(SystemClock));
        supervisor
            .supervise(spec(tmp.path(), "echo later"))
            .await
            .unwrap()
            .wait()
            .await;
        let stdout = std::fs::read_to_string(tmp.path().join("stdout.log")).unwrap();
        assert_eq!(stdout, "earlier\nlater\n");
    }
}
