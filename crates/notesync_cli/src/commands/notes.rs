//! Note commands: list, show, create, edit, delete.

use super::open_store;
use notesync_engine::LocalNotes;
use notesync_protocol::Document;
use std::path::Path;

/// Filters for the list command. Empty fields match everything.
#[derive(Debug, Default)]
pub struct ListFilter {
    /// Required tag.
    pub tag: Option<String>,
    /// Search query.
    pub search: Option<String>,
    /// Owning user.
    pub user: Option<String>,
}

impl ListFilter {
    fn select(&self, notes: &LocalNotes) -> Vec<Document> {
        let mut selected = match (&self.search, &self.tag) {
            (Some(query), _) => notes.search_notes(query),
            (None, Some(tag)) => notes.notes_by_tag(tag),
            (None, None) => notes.all_notes(),
        };
        if let Some(tag) = &self.tag {
            selected.retain(|doc| doc.tags.contains(tag));
        }
        if let Some(user) = &self.user {
            selected.retain(|doc| doc.user_id.as_deref() == Some(user.as_str()));
        }
        selected
    }
}

/// Runs the list command.
pub fn list(
    path: &Path,
    filter: &ListFilter,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let notes = LocalNotes::new(open_store(path)?);
    let selected = filter.select(&notes);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&selected)?);
        }
        _ => {
            if selected.is_empty() {
                println!("No notes.");
            }
            for doc in &selected {
                let marker = if doc.pending_sync { "*" } else { " " };
                let conflict = if doc.has_conflicts() { " [conflict]" } else { "" };
                println!(
                    "{} {}  {}  {}{}",
                    marker,
                    doc.id,
                    doc.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    doc.title,
                    conflict
                );
            }
        }
    }

    Ok(())
}

/// Prints one note as JSON.
pub fn show(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let notes = LocalNotes::new(open_store(path)?);
    let doc = notes
        .get_note(id)
        .ok_or_else(|| format!("Note not found: {}", id))?;
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

/// Creates a note and queues it for sync.
pub fn create(
    path: &Path,
    id: Option<String>,
    title: String,
    content: String,
    tags: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let notes = LocalNotes::new(open_store(path)?);
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if notes.get_note(&id).is_some() {
        return Err(format!("Note already exists: {}", id).into());
    }

    let doc = notes.create_note(Document::new(id, title, content).with_tags(tags))?;
    println!("Created {}", doc.id);
    Ok(())
}

/// Edits a note and queues the update.
pub fn edit(
    path: &Path,
    id: &str,
    title: Option<String>,
    content: Option<String>,
    tags: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let notes = LocalNotes::new(open_store(path)?);
    let mut doc = notes
        .get_note(id)
        .ok_or_else(|| format!("Note not found: {}", id))?;

    if title.is_none() && content.is_none() && tags.is_empty() {
        return Err("Nothing to change; pass --title, --content or --tag".into());
    }
    if let Some(title) = title {
        doc.title = title;
    }
    if let Some(content) = content {
        doc.content = content;
    }
    if !tags.is_empty() {
        doc.tags = tags.into_iter().collect();
    }

    let doc = notes.save_note(doc)?;
    println!("Updated {} at {}", doc.id, doc.updated_at.to_rfc3339());
    Ok(())
}

/// Queues deletion of a note.
pub fn delete(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let notes = LocalNotes::new(open_store(path)?);
    if notes.get_note(id).is_none() {
        return Err(format!("Note not found: {}", id).into());
    }
    if notes.delete_note(id)? {
        println!("Queued delete of {}", id);
    } else {
        println!("Delete of {} is already queued", id);
    }
    Ok(())
}
