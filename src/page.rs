//! Purpose: Render the single-page catalog form from a `CatalogSnapshot`.
//! Exports: `render_index`.
//! Role: Pure string rendering for `serve`; no I/O and no ledger access.
//! Invariants: Every ledger-supplied string is HTML-escaped before it is emitted.
//! Invariants: Borrow/return buttons post to `/books/{uid}/borrow|return`; the form posts to `/books`.

use bookledger::api::{Book, CatalogSnapshot};

const PAGE_HEAD: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Library Ledger</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 2rem; }
        table { border-collapse: collapse; margin-bottom: 2rem; min-width: 24rem; }
        th, td { border-bottom: 1px solid #ddd; padding: 0.4rem 0.8rem; text-align: left; }
        form.inline { display: inline; }
        .account { color: #666; font-size: 0.9rem; }
    </style>
</head>
<body>
"#;

const PAGE_TAIL: &str = r#"<script>
(function () {
    var last = null;
    function rows(books, action, label) {
        return books.map(function (book) {
            var cell = document.createElement('tr');
            var title = document.createElement('td');
            title.textContent = book.title;
            var uid = document.createElement('td');
            uid.textContent = String(book.uid);
            var act = document.createElement('td');
            var form = document.createElement('form');
            form.className = 'inline';
            form.method = 'post';
            form.action = '/books/' + book.uid + '/' + action;
            var button = document.createElement('button');
            button.type = 'submit';
            button.textContent = label;
            form.appendChild(button);
            act.appendChild(form);
            cell.appendChild(title);
            cell.appendChild(uid);
            cell.appendChild(act);
            return cell;
        });
    }
    function fill(id, nodes) {
        var body = document.getElementById(id);
        while (body.firstChild) { body.removeChild(body.firstChild); }
        nodes.forEach(function (node) { body.appendChild(node); });
    }
    function poll() {
        fetch('/api/catalog').then(function (resp) { return resp.json(); }).then(function (data) {
            var key = JSON.stringify([data.available, data.borrowed]);
            if (key === last) { return; }
            last = key;
            fill('borrowed-books', rows(data.borrowed, 'return', 'Return'));
            fill('available-books', rows(data.available, 'borrow', 'Borrow'));
        }).catch(function () {});
    }
    setInterval(poll, 1000);
})();
</script>
</body>
</html>
"#;

pub fn render_index(snapshot: &CatalogSnapshot) -> String {
    let account = snapshot
        .account
        .map(|account| account.to_string())
        .unwrap_or_else(|| "no account".to_string());

    let mut html = String::with_capacity(4096);
    html.push_str(PAGE_HEAD);
    html.push_str("<h1>Library Ledger</h1>\n");
    html.push_str(&format!(
        "<p class=\"account\">Acting account: <code>{}</code></p>\n",
        escape_html(&account)
    ));

    html.push_str("<h2>Add Book</h2>\n");
    html.push_str("<form method=\"post\" action=\"/books\">\n");
    html.push_str(&format!(
        "    <label>UID <input type=\"text\" name=\"uid\" value=\"{}\"></label>\n",
        escape_html(&snapshot.pending_uid)
    ));
    html.push_str(&format!(
        "    <label>Title <input type=\"text\" name=\"title\" value=\"{}\"></label>\n",
        escape_html(&snapshot.pending_title)
    ));
    html.push_str("    <button type=\"submit\">Add Book</button>\n</form>\n");
    html.push_str(
        "<form method=\"post\" action=\"/refresh\"><button type=\"submit\">Refresh</button></form>\n",
    );

    push_table(
        &mut html,
        "Borrowed Books",
        "borrowed-books",
        &snapshot.borrowed,
        "return",
        "Return",
    );
    push_table(
        &mut html,
        "Books Available for Borrowing",
        "available-books",
        &snapshot.available,
        "borrow",
        "Borrow",
    );
    html.push_str(PAGE_TAIL);
    html
}

fn push_table(
    html: &mut String,
    heading: &str,
    body_id: &str,
    books: &[Book],
    action: &str,
    label: &str,
) {
    html.push_str(&format!("<h2>{heading}</h2>\n<table>\n"));
    html.push_str("<thead><tr><th>Title</th><th>UID</th><th></th></tr></thead>\n");
    html.push_str(&format!("<tbody id=\"{body_id}\">\n"));
    for book in books {
        html.push_str(&format!(
            "<tr><td>{title}</td><td>{uid}</td><td><form class=\"inline\" method=\"post\" action=\"/books/{uid}/{action}\"><button type=\"submit\">{label}</button></form></td></tr>\n",
            title = escape_html(&book.title),
            uid = book.uid,
        ));
    }
    html.push_str("</tbody>\n</table>\n");
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
