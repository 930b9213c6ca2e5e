//! Plain-text rendering of HTML bodies.

/// Convert HTML to plain text.
///
/// - Removes `<script>` and `<style>` blocks entirely
/// - `<br>` becomes a newline, `</p>` a blank line
/// - Block elements (`div`, `tr`, `li`, headings) start a new line
/// - Strips every remaining tag
/// - Decodes named and numeric entities
/// - Collapses runs of blank lines to one and trims the result
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");
    text = remove_comments(&text);

    let stripped = strip_tags(&text);
    let decoded = decode_entities(&stripped);
    collapse_blank_lines(&decoded)
}

/// Replace each tag with the line structure it implies.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            // A '<' that never closes is text, not markup.
            out.push_str(&rest[open..]);
            return out;
        };
        out.push_str(tag_replacement(&after[..close]));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn tag_replacement(inner: &str) -> &'static str {
    let inner = inner.trim();
    let closing = inner.starts_with('/');
    let name: String = inner
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    match (name.as_str(), closing) {
        ("br", _) => "\n",
        ("p", true) => "\n\n",
        ("p", false) | ("li", false) => "\n",
        ("li", true) => "",
        ("div" | "tr" | "table" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6", _) => "\n",
        ("td" | "th", true) => " ",
        _ => "",
    }
}

/// Remove an entire tag block (e.g. `<script>…</script>`), case-insensitively.
fn remove_tag_block(html: &str, tag: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    let mut result = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open).map(|i| pos + i) {
        result.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => return result,
        }
    }
    result.push_str(&html[pos..]);
    result
}

fn remove_comments(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find("<!--") {
        result.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => return result,
        }
    }
    result.push_str(rest);
    result
}

/// Decode `&name;`, `&#NNN;` and `&#xHH;` entities. Unknown ones are kept.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .filter(|&semi| semi > 0 && semi <= 10)
            .and_then(|semi| decode_entity(&after[..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return match char::from_u32(code)? {
            '\u{a0}' => Some(' '),
            c => Some(c),
        };
    }
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "euro" => '€',
        "pound" => '£',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "hellip" => '…',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "bull" => '•',
        "middot" => '·',
        _ => return None,
    };
    Some(c)
}

/// Trim each line, keep at most one blank line between paragraphs, trim the whole.
fn collapse_blank_lines(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                cleaned.push('\n');
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            blank_run = 0;
        }
    }
    cleaned.trim().to_string()
}
