//! A minimal demonstration front-end for `camvault_core`: a line-oriented
//! stdin/stdout loop standing in for "any equivalent request layer" (the
//! core itself has no opinion on transport).

use std::io::{self, BufRead, Write};

use camvault_core::commands::{CreateRecordingInput, ProbeModeToggle, UpdateRecordingInput};
use camvault_core::settings::SettingsPatch;

fn main() {
    camvault_core::init_tracing();
    let surface = camvault_core::bootstrap();

    println!("camvaultd ready. Commands: list, get <id>, create <name> <rtspUrl> <startTimeRfc3339> <durationSecs>,");
    println!("  start <id>, stop <id>, delete <id>, rename <id> <name>, probe <rtspUrl>, stats, storage, cleanup, settings, quit");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            print!("> ");
            io::stdout().flush().ok();
            continue;
        }
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or("");
        match command {
            "quit" | "exit" => break,
            "list" => {
                for snapshot in surface.list_recordings() {
                    println!("{snapshot:?}");
                }
            }
            "get" => match parts.next() {
                Some(id) => match surface.get_recording(id) {
                    Ok(snapshot) => println!("{snapshot:?}"),
                    Err(err) => println!("error: {err}"),
                },
                None => println!("usage: get <id>"),
            },
            "create" => {
                let name = parts.next();
                let rtsp_url = parts.next();
                let start_time = parts.next();
                let duration = parts.next();
                match (name, rtsp_url, start_time, duration) {
                    (Some(name), Some(rtsp_url), Some(start_time), Some(duration)) => {
                        let parsed = start_time
                            .parse::<chrono::DateTime<chrono::Utc>>()
                            .map_err(|e| e.to_string())
                            .and_then(|start_time| {
                                duration
                                    .parse::<i64>()
                                    .map(|duration_secs| (start_time, duration_secs))
                                    .map_err(|e| e.to_string())
                            });
                        match parsed {
                            Ok((start_time, duration_secs)) => {
                                let result = surface.create_recording(CreateRecordingInput {
                                    name: name.to_string(),
                                    rtsp_url: rtsp_url.to_string(),
                                    start_time,
                                    duration_secs,
                                });
                                match result {
                                    Ok(snapshot) => println!("{snapshot:?}"),
                                    Err(err) => println!("error: {err}"),
                                }
                            }
                            Err(err) => println!("error: {err}"),
                        }
                    }
                    _ => println!("usage: create <name> <rtspUrl> <startTimeRfc3339> <durationSecs>"),
                }
            }
            "start" => match parts.next() {
                Some(id) => match surface.start_recording(id) {
                    Ok(()) => println!("ok"),
                    Err(err) => println!("error: {err}"),
                },
                None => println!("usage: start <id>"),
            },
            "stop" => match parts.next() {
                Some(id) => match surface.stop_recording(id) {
                    Ok(()) => println!("ok"),
                    Err(err) => println!("error: {err}"),
                },
                None => println!("usage: stop <id>"),
            },
            "delete" => match parts.next() {
                Some(id) => match surface.delete_recording(id) {
                    Ok(()) => println!("ok"),
                    Err(err) => println!("error: {err}"),
                },
                None => println!("usage: delete <id>"),
            },
            "probe-mode" => {
                let id = parts.next();
                let mode = parts.next();
                match (id, mode) {
                    (Some(id), Some("enable")) => {
                        println!("{:?}", surface.set_probe_mode(id, ProbeModeToggle::Enable))
                    }
                    (Some(id), Some("disable")) => {
                        println!("{:?}", surface.set_probe_mode(id, ProbeModeToggle::Disable))
                    }
                    _ => println!("usage: probe-mode <id> <enable|disable>"),
                }
            }
            "probe" => match parts.next() {
                Some(url) => println!("{:?}", surface.probe_stream(url)),
                None => println!("usage: probe <rtspUrl>"),
            },
            "stats" => println!("{:?}", surface.recording_stats()),
            "storage" => println!("{:?}", surface.storage_stats()),
            "cleanup" => println!("{:?}", surface.run_storage_cleanup()),
            "settings" => {
                if let Some(rest) = line.strip_prefix("settings ") {
                    match serde_json::from_str::<SettingsPatch>(rest) {
                        Ok(patch) => match surface.update_settings(patch) {
                            Ok(settings) => println!("{settings:?}"),
                            Err(err) => println!("error: {err}"),
                        },
                        Err(err) => println!("error: invalid settings patch json: {err}"),
                    }
                } else {
                    println!("{:?}", surface.read_settings());
                }
            }
            "orphans" => {
                for path in surface.list_orphan_attempts() {
                    println!("{path}");
                }
            }
            "rename" => {
                let id = parts.next();
                let name = parts.next();
                match (id, name) {
                    (Some(id), Some(name)) => {
                        let result = surface.update_recording(
                            id,
                            UpdateRecordingInput {
                                name: Some(name.to_string()),
                                ..Default::default()
                            },
                        );
                        match result {
                            Ok(snapshot) => println!("{snapshot:?}"),
                            Err(err) => println!("error: {err}"),
                        }
                    }
                    _ => println!("usage: rename <id> <name>"),
                }
            }
            _ if !command.is_empty() => {
                println!("unknown command: {command}");
            }
            _ => {}
        }
    }
}
