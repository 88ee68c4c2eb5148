//! Feed body parsing.
//!
//! Accepts RSS 2.0 (`rss/channel/item`), RSS 1.0 (`rdf:RDF/item`) and Atom
//! (`feed/entry`) documents. The root element picks the dialect; the items are
//! then read with `quick_xml`'s serde deserializer.

use crate::models::{FeedEntry, FeedItem};
use crate::utils::parse_pub_date;
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;
use std::error::Error;
use std::fmt;

/// A body that is not a readable feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedParseError(String);

impl fmt::Display for FeedParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed parse error: {}", self.0)
    }
}

impl Error for FeedParseError {}

/// Element text, ignoring any attributes (`<guid isPermaLink="false">`, `<title type="html">`).
#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

fn text(t: &Option<Text>) -> String {
    t.as_ref().map(|t| t.value.trim().to_string()).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct RssDoc {
    #[serde(default)]
    channel: RssChannel,
}

#[derive(Debug, Default, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

/// RSS 1.0 keeps its items next to the channel rather than inside it.
#[derive(Debug, Deserialize)]
struct RdfDoc {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<Text>,
    link: Option<Text>,
    description: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<Text>,
    #[serde(rename = "dc:date", alias = "date")]
    dc_date: Option<Text>,
    guid: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomDoc {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<Text>,
    content: Option<Text>,
    published: Option<Text>,
    updated: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    fn link(&self) -> String {
        self.links
            .iter()
            .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
            .or_else(|| self.links.first())
            .map(|l| l.href.trim().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Rss,
    Rdf,
    Atom,
}

/// Replace HTML entities that commonly leak into feeds but are not defined in XML.
fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "&#8211;")
        .replace("&mdash;", "&#8212;")
        .replace("&ldquo;", "&#8220;")
        .replace("&rdquo;", "&#8221;")
        .replace("&lsquo;", "&#8216;")
        .replace("&rsquo;", "&#8217;")
        .replace("&hellip;", "&#8230;")
}

fn dialect(xml: &str) -> Result<Dialect, FeedParseError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                return match name.as_str() {
                    "rss" => Ok(Dialect::Rss),
                    "rdf" => Ok(Dialect::Rdf),
                    "feed" => Ok(Dialect::Atom),
                    other => Err(FeedParseError(format!("unsupported root element <{other}>"))),
                };
            }
            Ok(Event::Eof) => return Err(FeedParseError("empty document".to_string())),
            Ok(_) => continue,
            Err(e) => return Err(FeedParseError(e.to_string())),
        }
    }
}

fn rss_items(xml: &str, kind: Dialect) -> Result<Vec<RssItem>, FeedParseError> {
    let items = if kind == Dialect::Rdf {
        quick_xml::de::from_str::<RdfDoc>(xml)
            .map_err(|e| FeedParseError(e.to_string()))?
            .items
    } else {
        quick_xml::de::from_str::<RssDoc>(xml)
            .map_err(|e| FeedParseError(e.to_string()))?
            .channel
            .items
    };
    Ok(items)
}

/// Parse a fetched feed body into raw items.
///
/// Dates that are missing or unparsable become `fetched_at`. Items with
/// neither a title nor a link are dropped.
pub fn parse_feed(
    body: &str,
    source_host: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<FeedItem>, FeedParseError> {
    let xml = scrub_html_entities(body);
    let kind = dialect(&xml)?;

    let raw: Vec<(String, String, String, String)> = match kind {
        Dialect::Rss | Dialect::Rdf => rss_items(&xml, kind)?
            .into_iter()
            .map(|it| {
                let date = Some(text(&it.pub_date))
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| text(&it.dc_date));
                (text(&it.title), text(&it.link), text(&it.description), date)
            })
            .collect(),
        Dialect::Atom => quick_xml::de::from_str::<AtomDoc>(&xml)
            .map_err(|e| FeedParseError(e.to_string()))?
            .entries
            .into_iter()
            .map(|entry| {
                let description = Some(text(&entry.summary))
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| text(&entry.content));
                let date = Some(text(&entry.published))
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| text(&entry.updated));
                (text(&entry.title), entry.link(), description, date)
            })
            .collect(),
    };

    Ok(raw
        .into_iter()
        .filter(|(title, link, _, _)| !title.is_empty() || !link.is_empty())
        .map(|(title, link, description, date)| FeedItem {
            title,
            link,
            description,
            published: parse_pub_date(&date).unwrap_or(fetched_at),
            source_host: source_host.to_string(),
        })
        .collect())
}

/// Parse an RSS document written by this crate back into entries, keeping
/// every field (including the `pubDate` text) as written.
pub fn parse_rss_entries(body: &str) -> Result<Vec<FeedEntry>, FeedParseError> {
    let xml = scrub_html_entities(body);
    let kind = dialect(&xml)?;
    if kind == Dialect::Atom {
        return Err(FeedParseError("expected an RSS document, found Atom".to_string()));
    }
    Ok(rss_items(&xml, kind)?
        .into_iter()
        .map(|it| FeedEntry {
            guid: text(&it.guid),
            title: text(&it.title),
            link: text(&it.link),
            description: text(&it.description),
            pub_date: text(&it.pub_date),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <description>Example feed</description>
    <item>
      <title>First &amp; foremost</title>
      <link>https://example.com/1</link>
      <description><![CDATA[<p>Hello&nbsp;world</p>]]></description>
      <pubDate>Fri, 16 May 2025 14:30:00 +0000</pubDate>
      <guid isPermaLink="false">g-1</guid>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/2</link>
      <pubDate>not a date</pubDate>
    </item>
    <item>
      <description>orphan without title or link</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_rss_items() {
        let items = parse_feed(RSS, "example.com", fetched_at()).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].title, "First & foremost");
        assert_eq!(items[0].link, "https://example.com/1");
        assert!(items[0].description.contains("<p>Hello"));
        assert_eq!(items[0].published.day(), 16);
        assert_eq!(items[0].source_host, "example.com");

        // unparsable date falls back to the fetch time
        assert_eq!(items[1].published, fetched_at());
        assert_eq!(items[1].description, "");
    }

    #[test]
    fn test_parse_atom_entries() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <link href="https://atom.example.org/"/>
  <entry>
    <title type="html">Atom entry</title>
    <link rel="self" href="https://atom.example.org/self/1"/>
    <link rel="alternate" href="https://atom.example.org/posts/1"/>
    <updated>2025-05-16T10:00:00Z</updated>
    <content type="html">Full content</content>
  </entry>
  <entry>
    <title>Summary entry</title>
    <link href="https://atom.example.org/posts/2"/>
    <published>2025-05-15T10:00:00+02:00</published>
    <summary>Short</summary>
  </entry>
</feed>"#;
        let items = parse_feed(atom, "atom.example.org", fetched_at()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link, "https://atom.example.org/posts/1");
        assert_eq!(items[0].description, "Full content");
        assert_eq!(items[0].published.day(), 16);
        assert_eq!(items[1].description, "Short");
        assert_eq!(items[1].published.day(), 15);
    }

    #[test]
    fn test_parse_rdf_items() {
        let rdf = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel rdf:about="https://rdf.example.net/">
    <title>RDF</title>
  </channel>
  <item rdf:about="https://rdf.example.net/a">
    <title>RDF item</title>
    <link>https://rdf.example.net/a</link>
  </item>
</rdf:RDF>"#;
        let items = parse_feed(rdf, "rdf.example.net", fetched_at()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "RDF item");
    }

    #[test]
    fn test_html_page_is_rejected() {
        let err = parse_feed("<html><body>nope</body></html>", "x", fetched_at()).unwrap_err();
        assert!(err.to_string().contains("parse"));
        assert!(err.to_string().contains("<html>"));
    }

    #[test]
    fn test_empty_and_malformed_bodies_are_rejected() {
        assert!(parse_feed("", "x", fetched_at()).is_err());
        assert!(parse_feed("<rss><channel><item><title>x</item></channel></rss>", "x", fetched_at()).is_err());
    }

    #[test]
    fn test_parse_rss_entries_keeps_raw_fields() {
        let entries = parse_rss_entries(RSS).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].guid, "g-1");
        assert_eq!(entries[0].pub_date, "Fri, 16 May 2025 14:30:00 +0000");
        assert_eq!(entries[1].guid, "");
    }
}
