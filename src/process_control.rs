/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    collaborators::{
        BenchmarkDriver, DriverOutput, MeasurementCapture, TargetControl, TargetHandle,
    },
    config::{Capture, Driver, Redirect, Target, Telemetry, Timing, Workload},
    reducer::TelemetryFiles,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use colored::*;
use std::{
    fs::OpenOptions,
    path::Path,
    process::{Output, Stdio},
    time::Duration,
};
use subprocess::{Exec, NullFile, Popen, Redirection};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

const DEFAULT_CAPTURE_DOWN: &str = "kill -INT {pid}";

/// Replaces every `{key}` in `template` with its value.
pub fn substitute(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Breaks a command string into a program and its arguments.
fn split_command(command: &str) -> anyhow::Result<(String, Vec<String>)> {
    let words = shlex::split(command)
        .ok_or_else(|| anyhow!("Command string is not POSIX compliant: {}", command))?;

    match &words[..] {
        [program, args @ ..] => Ok((program.clone(), args.to_vec())),
        _ => Err(anyhow!("Empty command")),
    }
}

/// Runs the given command as a detached process. This function does not block because the
/// process is managed by the OS and running separately from this thread.
///
/// # Arguments
///
/// * command - The command to run.
/// * redirect - Where the process' output goes, defaults to `./.stdout` and `./.stderr`.
///
/// # Returns
///
/// The handle of the spawned process
fn run_command_detached(command: &str, redirect: Option<Redirect>) -> anyhow::Result<Popen> {
    let redirect = redirect.unwrap_or(Redirect::File);
    let (program, args) = split_command(command)?;

    let exec = Exec::cmd(&program).args(&args[..]);
    let exec = match redirect {
        Redirect::Null => exec.stdout(NullFile).stderr(NullFile),
        Redirect::Parent => exec,
        Redirect::File => {
            let out_file = OpenOptions::new()
                .append(true)
                .create(true)
                .open("./.stdout")?;
            let err_file = OpenOptions::new()
                .append(true)
                .create(true)
                .open("./.stderr")?;
            exec.stdout(Redirection::File(out_file))
                .stderr(Redirection::File(err_file))
        }
    };

    exec.detached().popen().context(format!(
        "Failed to spawn detached process, command: {}",
        command
    ))
}

/// Runs the given command to completion and fails unless it exits successfully.
async fn run_command(command: &str) -> anyhow::Result<Output> {
    let (program, args) = split_command(command)?;

    let output = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .context(format!("Tokio command failed to run {program}"))?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(anyhow!(
            "Command '{}' exited with {}: {}",
            command,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

// ******** ******** ********
// **       TARGET         **
// ******** ******** ********
/// A running target. Dropping a handle that was never stopped kills the process, so an
/// interrupted experiment does not leave it behind.
pub struct TargetProcess {
    pid: u32,
    popen: Option<Popen>,
}
impl TargetHandle for TargetProcess {
    fn id(&self) -> String {
        self.pid.to_string()
    }
}
impl Drop for TargetProcess {
    fn drop(&mut self) {
        let Some(mut popen) = self.popen.take() else {
            return;
        };
        if popen.poll().is_none() {
            warn!("Target with pid {} was never stopped, killing it", self.pid);
            popen.kill().ok();
            popen.wait_timeout(Duration::from_secs(1)).ok();
        }
    }
}

/// Drives the system under test through the shell commands of the `[target]` section.
pub struct ShellTarget {
    config: Target,
    stop_timeout: Duration,
    start_check: Duration,
}
impl ShellTarget {
    pub fn new(config: Target, timing: &Timing) -> Self {
        Self {
            config,
            stop_timeout: timing.capture_stop_timeout(),
            start_check: timing.target_start_check(),
        }
    }
}

#[async_trait]
impl TargetControl for ShellTarget {
    type Handle = TargetProcess;

    async fn apply_mode(&mut self, mode: &str) -> anyhow::Result<()> {
        let command = substitute(&self.config.apply_mode, &[("mode", mode.to_string())]);
        debug!("Applying mode with {}", command);
        run_command(&command).await?;
        Ok(())
    }

    async fn start(&mut self) -> anyhow::Result<TargetProcess> {
        debug!("Running command {} in detached mode", self.config.up);
        let popen = run_command_detached(&self.config.up, self.config.redirect)?;
        let pid = popen.pid().context("Process should have a PID")?;
        let mut handle = TargetProcess {
            pid,
            popen: Some(popen),
        };

        tokio::time::sleep(self.start_check).await;
        if let Some(status) = handle.popen.as_mut().and_then(|popen| popen.poll()) {
            return Err(anyhow!(
                "Target '{}' exited right after starting ({:?})",
                self.config.up,
                status
            ));
        }

        println!("> started target {}", format!("(pid {pid})").bright_black());
        Ok(handle)
    }

    async fn stop(&mut self, mut handle: TargetProcess) -> anyhow::Result<()> {
        let pid = handle.pid;
        let Some(mut popen) = handle.popen.take() else {
            return Ok(());
        };
        print!("> stopping target {}", format!("(pid {pid})").bright_black());

        let res = match &self.config.down {
            Some(down) => {
                let down = substitute(down, &[("pid", pid.to_string())]);
                run_command(&down).await.map(|_| ())
            }
            None => popen.terminate().map_err(anyhow::Error::from),
        };
        if let Err(err) = res {
            println!();
            warn!("Failed to shutdown target with pid {}\n{}", pid, err);
            popen.kill().ok();
            return Err(err);
        }

        let stop_timeout = self.stop_timeout;
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if popen.wait_timeout(stop_timeout)?.is_none() {
                warn!("Target with pid {} ignored its down command, killing it", pid);
                popen.kill()?;
                popen.wait()?;
            }
            Ok(())
        })
        .await??;

        println!("\t{}", "✓".green());
        Ok(())
    }
}

// ******** ******** ********
// **       CAPTURE        **
// ******** ******** ********
pub struct CaptureProcesses {
    running: Vec<(Capture, Child)>,
}
impl CaptureProcesses {
    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

/// Runs every `[[capture]]` sampler alongside the target and collects their logs afterwards.
pub struct ShellCapture {
    captures: Vec<Capture>,
    telemetry: Telemetry,
    stop_timeout: Duration,
}
impl ShellCapture {
    pub fn new(captures: Vec<Capture>, telemetry: Telemetry, timing: &Timing) -> Self {
        Self {
            captures,
            telemetry,
            stop_timeout: timing.capture_stop_timeout(),
        }
    }

    async fn stop_one(&self, capture: &Capture, mut child: Child) -> anyhow::Result<()> {
        let Some(pid) = child.id() else {
            // already exited
            return Ok(());
        };

        let down = capture.down.as_deref().unwrap_or(DEFAULT_CAPTURE_DOWN);
        let down = substitute(down, &[("pid", pid.to_string())]);
        if let Err(err) = run_command(&down).await {
            child.kill().await.ok();
            return Err(err.context(format!("Failed to stop capture {}", capture.name)));
        }

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(status) => {
                debug!("Capture {} exited with {}", capture.name, status?);
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Capture {} did not exit within {:?}, killing it",
                    capture.name, self.stop_timeout
                );
                child.kill().await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MeasurementCapture for ShellCapture {
    type Handle = CaptureProcesses;

    async fn start(&mut self, target: &str) -> anyhow::Result<CaptureProcesses> {
        let mut running = vec![];
        for capture in self.captures.iter() {
            let up = substitute(&capture.up, &[("target", target.to_string())]);
            let (program, args) = split_command(&up)?;

            // if a later capture fails the earlier children are killed on drop
            let child = Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .context(format!("Failed to start capture {}", capture.name))?;

            println!("> started capture {}", capture.name.green());
            running.push((capture.clone(), child));
        }

        Ok(CaptureProcesses { running })
    }

    async fn stop(&mut self, handle: CaptureProcesses) -> anyhow::Result<()> {
        let mut first_err = None;
        for (capture, child) in handle.running {
            print!("> stopping capture {}", capture.name.green());
            match self.stop_one(&capture, child).await {
                Ok(()) => println!("\t{}", "✓".green()),
                Err(err) => {
                    println!();
                    warn!("{:#}", err);
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn retrieve(&mut self, run_dir: &Path) -> anyhow::Result<TelemetryFiles> {
        let run_dir_str = run_dir.to_string_lossy().to_string();
        for capture in self.captures.iter() {
            if let Some(retrieve) = &capture.retrieve {
                let command = substitute(retrieve, &[("run_dir", run_dir_str.clone())]);
                // a log that did not arrive is reported by the reducer
                if let Err(err) = run_command(&command).await {
                    warn!("Failed to retrieve log of capture {}\n{}", capture.name, err);
                }
            }
        }

        Ok(TelemetryFiles {
            power: Some(run_dir.join(&self.telemetry.power_file)),
            frequency: self
                .telemetry
                .frequency_file
                .as_ref()
                .map(|file| run_dir.join(file)),
        })
    }
}

// ******** ******** ********
// **       DRIVER         **
// ******** ******** ********

/// Runs the `[driver]` command with the workload's parameters substituted in.
pub struct ShellDriver {
    config: Driver,
    grace: Duration,
}
impl ShellDriver {
    pub fn new(config: Driver, timing: &Timing) -> Self {
        Self {
            config,
            grace: timing.driver_grace(),
        }
    }

    pub fn command_for(&self, workload: &Workload) -> String {
        substitute(
            &self.config.command,
            &[
                ("threads", workload.threads.to_string()),
                ("connections", workload.connections.to_string()),
                ("duration", workload.duration_secs.to_string()),
                ("rate", workload.rate.to_string()),
                ("workload", workload.name.clone()),
            ],
        )
    }
}

#[async_trait]
impl BenchmarkDriver for ShellDriver {
    async fn run(&mut self, workload: &Workload) -> anyhow::Result<DriverOutput> {
        let command = self.command_for(workload);
        let (program, args) = split_command(&command)?;

        let limit = workload.duration() + self.grace;
        let output = tokio::time::timeout(
            limit,
            Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| anyhow!("Benchmark '{}' did not finish within {:?}", command, limit))?
        .context(format!("Tokio command failed to run {program}"))?;

        debug!("Ran command {}", command);
        Ok(DriverOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
