// =============================================================================
// Command queue — at-least-once delivery of roll/open/close commands to MT5
// =============================================================================
//
// The Monitor/roll calculator enqueue commands here; the bridge's polling
// endpoint hands pending ones to the EA and marks them dispatched; the EA's
// execution-report endpoint closes the loop. Delivery is at-least-once: a
// command stays `Pending` (visible to polling) until an execution report
// arrives, so a terminal that polls twice before reporting back sees the
// same command twice rather than losing it.
//
// Grounded on the commands-queue section of `MT5/storage.py`
// (`enqueue_command`/`get_pending_commands`/`record_execution_report`/
// `list_commands`).
// =============================================================================

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::{Command, CommandStatus, ExecutionReport};

pub struct CommandQueue {
    commands: Mutex<HashMap<Uuid, Command>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(HashMap::new()),
        }
    }

    pub fn enqueue(&self, mut command: Command) -> Command {
        if command.status != CommandStatus::Pending {
            command.status = CommandStatus::Pending;
        }
        self.commands.lock().insert(command.id, command.clone());
        command
    }

    /// Returns up to `max_count` pending commands for a terminal/account,
    /// ordered oldest-first, and marks them dispatched (idempotently — a
    /// command already marked dispatched keeps its original timestamp).
    pub fn pending_for(
        &self,
        terminal_id: Option<&str>,
        account_number: Option<&str>,
        max_count: usize,
    ) -> Vec<Command> {
        let mut guard = self.commands.lock();
        let mut matching: Vec<Uuid> = guard
            .values()
            .filter(|c| c.status.is_dispatchable())
            .filter(|c| terminal_id.map(|t| c.terminal_id == t).unwrap_or(true))
            .filter(|c| {
                account_number
                    .map(|a| c.account_number == a)
                    .unwrap_or(true)
            })
            .map(|c| c.id)
            .collect();
        matching.sort_by_key(|id| guard[id].created_at);
        matching.truncate(max_count.max(1));

        let now = Utc::now();
        let mut result = Vec::with_capacity(matching.len());
        for id in matching {
            let command = guard.get_mut(&id).expect("id came from this same map");
            if command.dispatched_at.is_none() {
                command.dispatched_at = Some(now);
                command.status = CommandStatus::Dispatched;
            }
            result.push(command.clone());
        }
        result
    }

    /// Records an execution report. An unknown `command_id` creates a
    /// placeholder record so the report isn't silently dropped (the original
    /// preserves unmatched reports for audit rather than rejecting them).
    pub fn record_execution_report(&self, report: ExecutionReport) {
        let mut guard = self.commands.lock();
        let now = Utc::now();
        match guard.get_mut(&report.command_id) {
            Some(command) => {
                if report.status.is_terminal() {
                    command.completed_at = Some(now);
                }
                command.status = report.status;
                command.last_report = Some(report);
            }
            None => {
                // No matching command: keep a minimal placeholder for audit,
                // matching the original's "unknown command id" handling.
                let placeholder = Command {
                    id: report.command_id,
                    kind: crate::types::CommandType::RollPosition,
                    terminal_id: String::new(),
                    account_number: String::new(),
                    position_id: None,
                    close_leg: None,
                    open_leg: None,
                    constraints: None,
                    status: report.status,
                    created_at: now,
                    dispatched_at: None,
                    completed_at: report.status.is_terminal().then_some(now),
                    created_by: Uuid::nil(),
                    last_report: Some(report),
                };
                guard.insert(placeholder.id, placeholder);
            }
        }
    }

    pub fn get(&self, command_id: Uuid) -> Option<Command> {
        self.commands.lock().get(&command_id).cloned()
    }

    /// Lists commands newest-first, optionally filtered by creator.
    pub fn list(&self, created_by: Option<Uuid>, limit: usize) -> Vec<Command> {
        let guard = self.commands.lock();
        let mut items: Vec<Command> = guard
            .values()
            .filter(|c| created_by.map(|u| c.created_by == u).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit.max(1));
        items
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
