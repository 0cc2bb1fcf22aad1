use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::logging;
use crate::model::ExportedTicket;
use crate::text::TextNormalizer;
use crate::tokenize::{TokenStats, Tokenizer};

pub const TRAINING_FILE: &str = "training_data.jsonl";
pub const VALIDATION_FILE: &str = "validation_data.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path} line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed encoding record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("split ratio must be within 0.0..=1.0, got {0}")]
    InvalidRatio(f64),
}

/// How a ticket is flattened into text records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FormatPolicy {
    /// One record per ticket: subject, description and every turn.
    PerTicket,
    /// One context record per ticket plus one record per turn.
    ContextAndTurns,
    /// One record per turn, prefixed with the ticket id and subject.
    #[default]
    TurnWithContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingRecord {
    pub text: String,
}

/// Reads a JSON array of tickets or one ticket object per line.
pub fn load_tickets(path: &Path) -> Result<Vec<ExportedTicket>, TrainingError> {
    let raw = std::fs::read_to_string(path).map_err(|source| TrainingError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(&raw).map_err(|source| TrainingError::Parse {
            path: path.to_path_buf(),
            line: source.line(),
            source,
        });
    }

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| TrainingError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                source,
            })
        })
        .collect()
}

pub fn format_ticket(
    ticket: &ExportedTicket,
    policy: FormatPolicy,
    normalizer: &TextNormalizer,
) -> Vec<TrainingRecord> {
    let subject = normalizer.normalize(&ticket.subject);
    let turn = |persona: &str, body: &str| format!("{}: {}", persona, normalizer.normalize(body));

    match policy {
        FormatPolicy::PerTicket => {
            let mut text = format!(
                "Ticket ID: {} Subject: {} Description: {}",
                ticket.id,
                subject,
                normalizer.normalize(&ticket.description)
            );
            for conversation in &ticket.conversations {
                text.push(' ');
                text.push_str(&turn(&conversation.persona, &conversation.body));
            }
            vec![TrainingRecord { text }]
        }
        FormatPolicy::ContextAndTurns => {
            let mut records = vec![TrainingRecord {
                text: format!(
                    "Ticket ID: {} Subject: {} Description: {}",
                    ticket.id,
                    subject,
                    normalizer.normalize(&ticket.description)
                ),
            }];
            records.extend(ticket.conversations.iter().map(|conversation| TrainingRecord {
                text: turn(&conversation.persona, &conversation.body),
            }));
            records
        }
        FormatPolicy::TurnWithContext => ticket
            .conversations
            .iter()
            .map(|conversation| TrainingRecord {
                text: format!(
                    "Ticket ID: {} Subject: {} {} ",
                    ticket.id,
                    subject,
                    turn(&conversation.persona, &conversation.body)
                ),
            })
            .collect(),
    }
}

/// Shuffles, then cuts at `floor(len * ratio)`: training first, validation after.
pub fn split_data<T, R: Rng + ?Sized>(
    mut items: Vec<T>,
    ratio: f64,
    rng: &mut R,
) -> Result<(Vec<T>, Vec<T>), TrainingError> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(TrainingError::InvalidRatio(ratio));
    }
    items.shuffle(rng);
    let split_index = ((items.len() as f64) * ratio) as usize;
    let validation = items.split_off(split_index.min(items.len()));
    Ok((items, validation))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSummary {
    pub path: PathBuf,
    pub tickets: usize,
    pub records: usize,
    pub tokens: Option<TokenStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub training: PartitionSummary,
    pub validation: PartitionSummary,
}

pub fn write_partition<T: Tokenizer + ?Sized>(
    path: &Path,
    tickets: &[ExportedTicket],
    policy: FormatPolicy,
    normalizer: &TextNormalizer,
    tokenizer: &T,
) -> Result<PartitionSummary, TrainingError> {
    let write_err = |source: std::io::Error| TrainingError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(write_err)?);
    let mut token_counts = Vec::new();

    for ticket in tickets {
        for record in format_ticket(ticket, policy, normalizer) {
            token_counts.push(tokenizer.count_tokens(&record.text));
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n").map_err(write_err)?;
        }
    }
    out.flush().map_err(write_err)?;

    Ok(PartitionSummary {
        path: path.to_path_buf(),
        tickets: tickets.len(),
        records: token_counts.len(),
        tokens: TokenStats::from_counts(&token_counts),
    })
}

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub output_dir: PathBuf,
    pub split_ratio: f64,
    pub policy: FormatPolicy,
}

pub fn build_dataset<T: Tokenizer + ?Sized, R: Rng + ?Sized>(
    tickets: Vec<ExportedTicket>,
    options: &DatasetOptions,
    normalizer: &TextNormalizer,
    tokenizer: &T,
    rng: &mut R,
) -> Result<DatasetSummary, TrainingError> {
    std::fs::create_dir_all(&options.output_dir).map_err(|source| TrainingError::Write {
        path: options.output_dir.clone(),
        source,
    })?;

    let (training, validation) = split_data(tickets, options.split_ratio, rng)?;
    logging::info(format!(
        "split into {} training and {} validation ticket(s)",
        training.len(),
        validation.len()
    ));

    let training = write_partition(
        &options.output_dir.join(TRAINING_FILE),
        &training,
        options.policy,
        normalizer,
        tokenizer,
    )?;
    let validation = write_partition(
        &options.output_dir.join(VALIDATION_FILE),
        &validation,
        options.policy,
        normalizer,
        tokenizer,
    )?;

    Ok(DatasetSummary {
        training,
        validation,
    })
}

pub fn log_stats(name: &str, summary: &PartitionSummary) {
    match &summary.tokens {
        Some(stats) => logging::info(format!(
            "{} - records: {}, min tokens: {}, max tokens: {}, average tokens: {:.2}",
            name, stats.records, stats.min, stats.max, stats.mean
        )),
        None => logging::info(format!("{} - no records", name)),
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::model::ExportedConversation;
    use crate::tokenize::ApproxTokenizer;

    fn ticket(id: i64, turns: usize) -> ExportedTicket {
        ExportedTicket {
            id,
            created_at: None,
            updated_at: None,
            subject: format!("Pump {id}\n  issue"),
            description: "It stopped.".into(),
            severity: None,
            region: None,
            conversations: (0..turns)
                .map(|n| ExportedConversation {
                    id: id * 100 + n as i64,
                    created_at: None,
                    persona: if n % 2 == 0 {
                        "Customer".into()
                    } else {
                        "support agent reply".into()
                    },
                    body: format!("turn\n{n}"),
                })
                .collect(),
        }
    }

    #[test]
    fn turn_with_context_emits_one_record_per_turn() {
        let records = format_ticket(
            &ticket(7, 3),
            FormatPolicy::TurnWithContext,
            &TextNormalizer::default(),
        );
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0].text,
            "Ticket ID: 7 Subject: Pump 7 issue Customer: turn 0 "
        );
        assert!(records
            .iter()
            .all(|r| r.text.starts_with("Ticket ID: 7 Subject: Pump 7 issue ")));
        assert!(records.iter().all(|r| !r.text.contains('\n')));
    }

    #[test]
    fn per_ticket_emits_single_record_with_every_turn() {
        let records = format_ticket(
            &ticket(7, 2),
            FormatPolicy::PerTicket,
            &TextNormalizer::default(),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].text,
            "Ticket ID: 7 Subject: Pump 7 issue Description: It stopped. Customer: turn 0 support agent reply: turn 1"
        );
    }

    #[test]
    fn context_and_turns_emits_context_then_turns() {
        let records = format_ticket(
            &ticket(7, 2),
            FormatPolicy::ContextAndTurns,
            &TextNormalizer::default(),
        );
        assert_eq!(records.len(), 3);
        assert!(records[0].text.starts_with("Ticket ID: 7"));
        assert_eq!(records[1].text, "Customer: turn 0");
        assert_eq!(records[2].text, "support agent reply: turn 1");
    }

    #[test]
    fn seeded_split_is_eighty_twenty_and_reproducible() {
        let ids: Vec<i64> = (1..=10).collect();
        let (train_a, valid_a) =
            split_data(ids.clone(), 0.8, &mut StdRng::seed_from_u64(7)).expect("split");
        let (train_b, valid_b) =
            split_data(ids.clone(), 0.8, &mut StdRng::seed_from_u64(7)).expect("split");

        assert_eq!(train_a.len(), 8);
        assert_eq!(valid_a.len(), 2);
        assert_eq!(train_a, train_b);
        assert_eq!(valid_a, valid_b);

        let mut all: Vec<i64> = train_a.into_iter().chain(valid_a).collect();
        all.sort_unstable();
        assert_eq!(all, ids);
    }

    #[test]
    fn split_rejects_out_of_range_ratio() {
        let err = split_data(vec![1, 2], 1.5, &mut StdRng::seed_from_u64(1))
            .expect_err("ratio too large");
        assert!(matches!(err, TrainingError::InvalidRatio(_)));
    }

    #[test]
    fn loads_json_array_and_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");

        let array_path = dir.path().join("tickets.json");
        std::fs::write(
            &array_path,
            r#"[{"ticket_id": 1, "subject": "a", "conversations": [{"id": 5, "persona": "Customer", "body": "hi"}]}]"#,
        )
        .expect("write");
        let from_array = load_tickets(&array_path).expect("array");
        assert_eq!(from_array.len(), 1);
        assert_eq!(from_array[0].conversations[0].body, "hi");

        let lines_path = dir.path().join("tickets.jsonl");
        std::fs::write(&lines_path, "{\"id\": 1}\n\n{\"id\": 2}\n").expect("write");
        let from_lines = load_tickets(&lines_path).expect("jsonl");
        assert_eq!(
            from_lines.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![1, 2]
        );

        std::fs::write(&lines_path, "{\"id\": 1}\nnot json\n").expect("write");
        let err = load_tickets(&lines_path).expect_err("bad line");
        assert!(matches!(err, TrainingError::Parse { line: 2, .. }));
    }

    #[test]
    fn builds_both_partitions_with_stats() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tickets: Vec<ExportedTicket> = (1..=10).map(|id| ticket(id, 2)).collect();
        let options = DatasetOptions {
            output_dir: dir.path().join("dataset"),
            split_ratio: 0.8,
            policy: FormatPolicy::TurnWithContext,
        };

        let summary = build_dataset(
            tickets,
            &options,
            &TextNormalizer::default(),
            &ApproxTokenizer,
            &mut StdRng::seed_from_u64(42),
        )
        .expect("build");

        assert_eq!(summary.training.tickets, 8);
        assert_eq!(summary.validation.tickets, 2);
        assert_eq!(summary.training.records, 16);
        assert_eq!(summary.validation.records, 4);

        let written = std::fs::read_to_string(options.output_dir.join(TRAINING_FILE))
            .expect("read training");
        assert_eq!(written.lines().count(), 16);
        for line in written.lines() {
            let value: serde_json::Value = serde_json::from_str(line).expect("json line");
            assert!(value["text"].as_str().expect("text").starts_with("Ticket ID: "));
        }
        assert!(summary.training.tokens.expect("stats").min > 0);
    }
}
