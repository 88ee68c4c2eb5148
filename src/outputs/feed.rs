//! RSS 2.0 feed writer.
//!
//! Serializes a [`FeedMetadata`] and an ordered list of [`FeedEntry`] values
//! into a complete document in memory, then writes it with a single file
//! write so a failure mid-serialization never leaves a truncated feed behind.

use crate::models::{FeedEntry, FeedMetadata};
use crate::utils::ensure_parent_dir;
use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::error::Error;
use std::io::{Cursor, Write};
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

fn text_element<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), Box<dyn Error>> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(value))?;
    Ok(())
}

/// Render a feed document.
///
/// # Arguments
///
/// * `metadata` - Channel-level title, link, description, language and generator
/// * `entries` - Items in the order they should appear
/// * `built_at` - Rendered as the channel's `lastBuildDate`
///
/// # Returns
///
/// The UTF-8 document text.
pub fn render_feed(
    metadata: &FeedMetadata,
    entries: &[FeedEntry],
    built_at: DateTime<Utc>,
) -> Result<String, Box<dyn Error>> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &metadata.title)?;
    text_element(&mut writer, "link", &metadata.link)?;
    text_element(&mut writer, "description", &metadata.description)?;
    text_element(&mut writer, "language", &metadata.language)?;
    text_element(&mut writer, "lastBuildDate", &built_at.to_rfc2822())?;
    text_element(&mut writer, "generator", &metadata.generator)?;

    for entry in entries {
        writer.write_event(Event::Start(BytesStart::new("item")))?;
        writer
            .create_element("guid")
            .with_attribute(("isPermaLink", "false"))
            .write_text_content(BytesText::new(&entry.guid))?;
        text_element(&mut writer, "title", &entry.title)?;
        text_element(&mut writer, "description", &entry.description)?;
        text_element(&mut writer, "link", &entry.link)?;
        text_element(&mut writer, "pubDate", &entry.pub_date)?;
        writer.write_event(Event::End(BytesEnd::new("item")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    let mut xml = String::from_utf8(writer.into_inner().into_inner())?;
    xml.push('\n');
    Ok(xml)
}

/// Render and write a feed document to `path`, replacing any existing file.
#[instrument(level = "info", skip_all, fields(path = %path.display(), entries = entries.len()))]
pub async fn write_feed(
    path: &Path,
    metadata: &FeedMetadata,
    entries: &[FeedEntry],
    built_at: DateTime<Utc>,
) -> Result<(), Box<dyn Error>> {
    let xml = render_feed(metadata, entries, built_at)?;
    ensure_parent_dir(path).await?;
    fs::write(path, xml).await?;
    info!("Wrote feed");
    Ok(())
}
