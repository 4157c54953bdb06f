//! The launcher binary tears its containers down on SIGTERM
#![cfg(unix)]

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Container CLI stand-in whose `run` stays up until signalled
fn write_runtime(dir: &Path, pid_file: &Path) -> std::path::PathBuf {
    let script = dir.join("fake-docker");
    let body = format!(
        "#!/bin/sh\n\
         case \"$1\" in\n\
         run)\n\
           echo $$ > '{}'\n\
           echo 'mongod startup complete'\n\
           exec sleep 300 ;;\n\
         ps)\n\
           echo 'CONTAINER ID   IMAGE   COMMAND   CREATED   STATUS   PORTS   NAMES' ;;\n\
         esac\n",
        pid_file.display()
    );
    std::fs::write(&script, body).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

#[tokio::test]
async fn test_sigterm_terminates_running_containers() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("container.pid");
    let runtime = write_runtime(dir.path(), &pid_file);
    let config = dir.path().join("session.yaml");
    std::fs::write(
        &config,
        format!(
            "cache_dir: {}\nshutdown_timeout_secs: 2\n",
            dir.path().join("cache").display()
        ),
    )
    .unwrap();

    let mut launcher = Command::new(env!("CARGO_BIN_EXE_etherna_launch"))
        .arg("--config")
        .arg(&config)
        .arg("--runtime")
        .arg(&runtime)
        .arg("--only")
        .arg("mongo")
        .env_remove("RUST_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let stdout = launcher.stdout.take().unwrap();
    let mut lines = BufReader::new(stdout).lines();
    let ready = tokio::time::timeout(Duration::from_secs(20), async {
        while let Some(line) = lines.next_line().await.unwrap() {
            if line.contains("etherna-mongodb") && line.contains("ready") {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(ready);

    let container: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(is_alive(container));

    let launcher_pid = launcher.id().unwrap() as i32;
    kill(Pid::from_raw(launcher_pid), Signal::SIGTERM).unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), launcher.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());

    let mut gone = false;
    for _ in 0..100 {
        if !is_alive(container) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "container process {} outlived the launcher", container);
}
