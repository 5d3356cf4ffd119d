// Copyright (c) 2026 Switchyard Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Delegate Directory
//!
//! Markdown listing of an agent's delegate targets, meant to be placed in
//! the agent's system prompt. Output is deterministic for a given set of
//! targets: one row per agent, ordered by agent key then id.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

use crate::domain::link::{AgentId, DelegateTarget};

const HEADER: &str = "## Delegate Agents\n\n\
You can hand work to the agents below. Refer to them by key.\n\n";

const EMPTY: &str = "_No delegate agents are available._\n";

pub fn render_delegate_directory(targets: &[DelegateTarget]) -> String {
    // Several links may reach the same agent; the first (oldest) wins.
    let mut rows: BTreeMap<(&str, AgentId), &DelegateTarget> = BTreeMap::new();
    let mut seen = HashSet::new();
    for target in targets {
        if seen.insert(target.agent_id) {
            rows.insert((target.agent_key.as_str(), target.agent_id), target);
        }
    }

    let mut out = String::from(HEADER);
    if rows.is_empty() {
        out.push_str(EMPTY);
        return out;
    }

    out.push_str("| Agent | Name | Description | Team | Concurrency |\n");
    out.push_str("|-------|------|-------------|------|-------------|\n");
    for target in rows.values() {
        let concurrency = match target.link.max_concurrent {
            0 => "unlimited".to_string(),
            n => n.to_string(),
        };
        // Writing into a String cannot fail.
        let _ = writeln!(
            out,
            "| `{}` | {} | {} | {} | {} |",
            cell(&target.agent_key),
            cell(target.display_name.as_deref().unwrap_or("")),
            cell(target.description.as_deref().unwrap_or("")),
            cell(target.team_name.as_deref().unwrap_or("")),
            concurrency,
        );
    }
    out
}

fn cell(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}
