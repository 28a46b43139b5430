use anyhow::{bail, Result};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Maximum element nesting accepted in a feed document
const MAX_XML_DEPTH: usize = 64;

/// Channel metadata and items of one fetched feed.
///
/// Produced fresh by every fetch and consumed by the ingestor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<FetchedItem>,
}

/// One `<item>` as it appeared in the document. `pub_date` is left raw;
/// date normalization happens at ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
}

#[derive(Clone, Copy)]
enum Field {
    Title,
    Link,
    Description,
    PubDate,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"description" => Some(Field::Description),
            b"pubDate" | b"dc:date" => Some(Field::PubDate),
            _ => None,
        }
    }
}

/// Parse a syndication document.
///
/// RSS 2.0 and RSS 1.0 (RDF) are read directly so item dates stay exactly
/// as published. Anything else (Atom, JSON Feed) goes through `feed-rs`,
/// with its parsed dates rendered back as RFC 3339.
pub fn parse_feed(bytes: &[u8]) -> Result<FetchedFeed> {
    let text = String::from_utf8_lossy(bytes);
    match root_element(&text).as_deref() {
        Some("rss") | Some("rdf:RDF") => parse_rss(&text),
        _ => parse_with_feed_rs(bytes),
    }
}

/// Name of the first element in the document, if it is XML at all
fn root_element(content: &str) -> Option<String> {
    let mut reader = Reader::from_str(content);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn parse_rss(content: &str) -> Result<FetchedFeed> {
    // quick-xml (0.37) never expands <!ENTITY> declarations from a
    // DOCTYPE, so external-entity payloads in a hostile feed stay inert.
    let mut reader = Reader::from_str(content);

    let mut feed = FetchedFeed::default();
    let mut current_item: Option<FetchedItem> = None;
    // Open elements, outermost first. Prefixed names are kept as-is, so
    // `<atom:link>` never collides with `<link>`.
    let mut path: Vec<Vec<u8>> = Vec::new();
    // Text and CDATA pieces of the open field element, trimmed once on close
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if path.len() >= MAX_XML_DEPTH {
                    bail!("feed nesting depth exceeds maximum of {MAX_XML_DEPTH} levels");
                }
                if e.name().as_ref() == b"item" {
                    current_item = Some(FetchedItem::default());
                }
                if Field::from_name(e.name().as_ref()).is_some() {
                    text.clear();
                }
                path.push(e.name().as_ref().to_vec());
            }
            Ok(Event::End(e)) => {
                if Field::from_name(e.name().as_ref()).is_some() {
                    assign(&path, &mut feed, current_item.as_mut(), text.trim());
                    text.clear();
                }
                if e.name().as_ref() == b"item" {
                    if let Some(item) = current_item.take() {
                        feed.items.push(item);
                    }
                }
                path.pop();
            }
            Ok(Event::Text(e)) => match e.unescape() {
                Ok(t) => text.push_str(&t),
                Err(_) => text.push_str(&String::from_utf8_lossy(&e)),
            },
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::Eof) => break,
            Err(e) => bail!(
                "XML parse error at position {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
        buf.clear();
    }

    Ok(feed)
}

/// Append the text of a just-closed element to its channel or item field.
fn assign(path: &[Vec<u8>], feed: &mut FetchedFeed, item: Option<&mut FetchedItem>, text: &str) {
    let [.., parent, leaf] = path else {
        return;
    };
    let Some(field) = Field::from_name(leaf) else {
        return;
    };

    let target = match (parent.as_slice(), item) {
        (b"item", Some(item)) => match field {
            Field::Title => &mut item.title,
            Field::Link => &mut item.link,
            Field::Description => &mut item.description,
            Field::PubDate => &mut item.pub_date,
        },
        (b"channel", _) => match field {
            Field::Title => &mut feed.title,
            Field::Link => &mut feed.link,
            Field::Description => &mut feed.description,
            Field::PubDate => return,
        },
        _ => return,
    };

    let text = match field {
        Field::Title | Field::Description => unescape_html(text),
        Field::Link | Field::PubDate => text.to_string(),
    };
    target.push_str(&text);
}

/// Titles and descriptions are frequently entity-encoded twice
/// (`&amp;#8217;`). Decode one more level; leave the text alone if that fails.
fn unescape_html(text: &str) -> String {
    match quick_xml::escape::unescape(text) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => text.to_string(),
    }
}

fn parse_with_feed_rs(bytes: &[u8]) -> Result<FetchedFeed> {
    let parsed = feed_rs::parser::parse(bytes)?;

    let items = parsed
        .entries
        .into_iter()
        .map(|entry| FetchedItem {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            description: entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default(),
            pub_date: entry
                .published
                .or(entry.updated)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        })
        .collect();

    Ok(FetchedFeed {
        title: parsed.title.map(|t| t.content).unwrap_or_default(),
        link: parsed
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_default(),
        description: parsed.description.map(|d| d.content).unwrap_or_default(),
        items,
    })
}
