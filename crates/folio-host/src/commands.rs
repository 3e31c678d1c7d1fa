//! Line commands read from stdin.

use crate::library::Library;
use folio_core::{Document, DocumentId};
use folio_sync::{DocumentStore, SyncEngine};
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};

pub const HELP: &str = "\
commands:
  list                 list documents (* marks the active one)
  new <name>           create an empty document
  select <id>          switch to a document (debounced)
  load <id> [reload]   switch now, optionally asking for a reload
  status               show engine state and counters
  help                 show this help
  quit                 stop the engine and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    New(String),
    Select(String),
    Load { id: String, reload: bool },
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        match word {
            "list" | "ls" => Ok(Command::List),
            "new" if !rest.is_empty() => Ok(Command::New(rest.to_string())),
            "new" => Err("usage: new <name>".into()),
            "select" if !rest.is_empty() => Ok(Command::Select(rest.to_string())),
            "select" => Err("usage: select <id>".into()),
            "load" => {
                let mut parts = rest.split_whitespace();
                let id = parts.next().ok_or("usage: load <id> [reload]")?;
                let reload = match parts.next() {
                    None => false,
                    Some("reload") => true,
                    Some(other) => return Err(format!("unexpected argument '{other}'")),
                };
                Ok(Command::Load {
                    id: id.to_string(),
                    reload,
                })
            }
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command '{other}', try 'help'")),
        }
    }
}

/// Read commands until `quit` or end of input.
pub async fn repl(engine: &SyncEngine, library: &Library) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => execute(engine, library, command).await,
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}

async fn execute(engine: &SyncEngine, library: &Library, command: Command) {
    match command {
        Command::List => match library.list() {
            Ok(documents) => {
                let active = engine.active_document();
                for doc in documents {
                    let marker = if Some(doc.id) == active { '*' } else { ' ' };
                    println!("{marker} {}  {} ({} records)", doc.id, doc.name, doc.elements.len());
                }
            }
            Err(e) => eprintln!("could not list documents: {e}"),
        },
        Command::New(name) => {
            let document = Document::new(name);
            let id = document.id;
            match library.put(document) {
                Ok(()) => println!("created {id}"),
                Err(e) => eprintln!("could not create document: {e}"),
            }
        }
        Command::Select(id) => {
            if let Some(document) = find(library, &id) {
                engine.select_document(document);
            }
        }
        Command::Load { id, reload } => {
            if let Some(document) = find(library, &id) {
                match engine.load_document(document, reload).await {
                    Ok(outcome) => println!("{outcome:?}"),
                    Err(e) => eprintln!("load failed: {e}"),
                }
            }
        }
        Command::Status => {
            match engine.active_document() {
                Some(id) => println!("active:    {id}"),
                None => println!("active:    (none)"),
            }
            println!("phase:     {:?}", engine.switch_phase());
            println!("suspended: {}", engine.is_autosave_suspended());
            println!("pending:   {}", engine.pending_operations());
            println!("retries:   {}", engine.retry_count());
            match serde_json::to_string(&engine.stats()) {
                Ok(stats) => println!("stats:     {stats}"),
                Err(e) => eprintln!("could not render stats: {e}"),
            }
            println!("registry:  {:?}", engine.coordinator_stats());
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn find(library: &Library, id: &str) -> Option<Document> {
    match library.get(DocumentId::intern(id)) {
        Ok(Some(document)) => Some(document),
        Ok(None) => {
            eprintln!("no document '{id}'");
            None
        }
        Err(e) => {
            eprintln!("could not read document '{id}': {e}");
            None
        }
    }
}
