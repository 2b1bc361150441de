// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;

use media_sys::{CommandOutcome, CommandRunner, Result, SysError, ToolCommand};

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Failure(String),
}

struct Rule {
    prefix: String,
    replies: VecDeque<Reply>,
}

/// Serves canned tool output by command-line prefix and records every call.
///
/// Each rule answers with its replies in order and repeats the last one.
/// Commands no rule matches succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<(String, Option<String>)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, prefix: &str, reply: Reply) -> Self {
        {
            let mut rules = self.rules.borrow_mut();
            match rules.iter_mut().find(|rule| rule.prefix == prefix) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    prefix: prefix.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    pub fn on(self, prefix: &str, stdout: &str) -> Self {
        self.push(prefix, Reply::Output(stdout.to_string()))
    }

    pub fn fail(self, prefix: &str, stderr: &str) -> Self {
        self.push(prefix, Reply::Failure(stderr.to_string()))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Standard input handed to each call starting with `prefix`.
    pub fn inputs_to(&self, prefix: &str) -> Vec<Option<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(c, _)| c.starts_with(prefix))
            .map(|(_, input)| input.clone())
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &ToolCommand) -> Result<CommandOutcome> {
        let rendered = command.render();
        self.calls
            .borrow_mut()
            .push((rendered.clone(), command.input().map(str::to_string)));

        let reply = {
            let mut rules = self.rules.borrow_mut();
            rules
                .iter_mut()
                .find(|rule| rendered.starts_with(&rule.prefix))
                .and_then(|rule| {
                    if rule.replies.len() > 1 {
                        rule.replies.pop_front()
                    } else {
                        rule.replies.front().cloned()
                    }
                })
        };

        match reply.unwrap_or(Reply::Output(String::new())) {
            Reply::Output(stdout) => Ok(CommandOutcome {
                command: rendered,
                stdout,
                stderr: String::new(),
                executed: true,
            }),
            Reply::Failure(stderr) => Err(SysError::CommandFailed {
                command: rendered,
                stderr,
            }),
        }
    }
}

pub const LSBLK: &str = "lsblk --exclude 1,2,11 -J -b -O";
pub const PRINT_SDA: &str = "parted --machine --script -- /dev/sda unit B print";

pub const SDA_HEADER: &str = "BYT;\n/dev/sda:4294967296B:scsi:512:512:gpt:ATA VBOX HARDDISK:;\n";

/// `parted print` machine output for sda with the given partition rows.
pub fn sda_table(rows: &[&str]) -> String {
    let mut out = SDA_HEADER.to_string();
    for row in rows {
        out.push_str(row);
        out.push_str(";\n");
    }
    out
}

/// A lsblk descriptor holding a single device.
pub fn lsblk_json(device: &str) -> String {
    format!(r#"{{"blockdevices": [{device}]}}"#)
}

/// Fresh directory under the system temp dir.
pub fn temp_root() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("install-media-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
