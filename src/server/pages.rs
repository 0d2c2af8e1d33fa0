use html_to_string_macro::html;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};

use crate::mal::WatchEntry;
use crate::settings::Settings;
use crate::token::Lifetime;

pub(super) const NO_PAGE: &str = "Error: 404, No Page Found";

macro_rules! layout {
    ($title: expr, $($html: tt)*) => {
        layout($title, html! { $($html)* })
    };
}

/// Minimal HTML escaping for text and attribute values.
pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn page(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

pub fn settings(settings: &Settings, lifetime: Lifetime, error: &str) -> Response<Full<Bytes>> {
    let value = |key: &str| escape(&settings.get_str(key).unwrap_or_default());
    let picture = settings.get_str("picture").unwrap_or_default();
    let avatar = match settings.get_str("id").unwrap_or_default().is_empty() {
        true => String::new(),
        false => html! { <img class="avatar" src={format!("/static/Profile{}", escape(&picture))} alt="Profile" /> },
    };
    let error = match error.is_empty() {
        true => String::new(),
        false => html! { <p class="error">{escape(error)}</p> },
    };
    let (days, hours, minutes, seconds) = lifetime.parts();

    page(
        StatusCode::OK,
        layout! { "Settings",
            <header>
                {avatar}
                <h1>{value("name")}</h1>
                <a class="corner" href="/">"Watch list"</a>
            </header>
            {error}
            <form method="post" action="/save-settings">
                <label>"Client ID"<input type="text" name="CLIENT_ID" value={value("CLIENT_ID")} /></label>
                <label>"Client Secret"<input type="password" name="CLIENT_SECRET" value={value("CLIENT_SECRET")} /></label>
                <label>"Calendar"<input type="text" name="calendar" value={value("calendar")} /></label>
                <label><input type="checkbox" name="refresh" value="on" />"Refresh token now"</label>
                <button type="submit">"Save"</button>
            </form>
            <footer data-time={lifetime.remaining.max(0)}>
                "Token expires in "
                <span id="days">{days}</span>" day"<span>{plural(days)}</span>" "
                <span id="hours">{hours}</span>" hour"<span>{plural(hours)}</span>" "
                <span id="minutes">{minutes}</span>" minute"<span>{plural(minutes)}</span>" "
                <span id="seconds">{seconds}</span>" second"<span>{plural(seconds)}</span>
            </footer>
            <script src="/static/countdown.js"></script>
        },
    )
}

fn plural(count: i64) -> &'static str {
    match count {
        1 => "",
        _ => "s",
    }
}

fn entry_form(entry: &WatchEntry) -> String {
    let total = match entry.total {
        0 => "?".to_string(),
        total => total.to_string(),
    };
    let picture = match &entry.picture {
        Some(url) => html! { <img src={escape(url)} alt="" /> },
        None => String::new(),
    };

    html! {
        <form class="entry" method="post" action="/update-status">
            {picture}
            <h3>{escape(&entry.title)}</h3>
            <p>{entry.watched}" / "{total}</p>
            <input type="hidden" name="animes" value={entry.id} />
            <input type="hidden" name="up_until" value={entry.watched} />
            <input type="hidden" name="total" value={entry.total} />
            <input type="number" name="watched" min="0" placeholder="Episodes watched" />
            <button type="submit">"Update"</button>
        </form>
    }
}

/// The in-progress list. `overflow` is the entry held back from the list,
/// shown only as a marker that more exists.
pub fn watch_list(entries: &[WatchEntry], overflow: Option<&WatchEntry>) -> Response<Full<Bytes>> {
    let forms: String = entries.iter().map(entry_form).collect();
    let more = match overflow {
        Some(entry) => html! { <p class="more">"More on your list, next up: "{escape(&entry.title)}</p> },
        None => String::new(),
    };

    page(
        StatusCode::OK,
        layout! { "Watching",
            <header>
                <h1>"Currently watching"</h1>
                <a class="corner" href="/settings">"Settings"</a>
            </header>
            <main>{forms}</main>
            {more}
        },
    )
}

pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    page(
        StatusCode::NOT_FOUND,
        layout! { "Not Found",
            <h1>"Something went wrong"</h1>
            <h3 class="error">{escape(message)}</h3>
            <a href="/settings">"Back to settings"</a>
        },
    )
}

pub fn gone(message: &str) -> Response<Full<Bytes>> {
    page(
        StatusCode::GONE,
        layout! { "Locked",
            <h1>"Locked"</h1>
            <h3>{escape(message)}</h3>
            <p>"This tab may now be closed"</p>
        },
    )
}

fn layout(title: &str, body: String) -> String {
    html! {
        <html>
            <head>
                <meta charset="utf-8" />
                <title>"Remainder - "{title}</title>
                <style>"
                * {
                    box-sizing: border-box
                }
                html {
                    font-family: Arial;
                    background-color: #1d2330;
                    color: #FFFFFF
                }
                body {
                    padding: 1.5rem;
                }
                header {
                    display: flex;
                    align-items: center;
                    gap: 1rem;
                }
                .avatar {
                    width: 4rem;
                    border-radius: 50%;
                }
                .corner {
                    margin-left: auto;
                    color: #2e51a2;
                }
                form {
                    display: flex;
                    flex-direction: column;
                    gap: .5rem;
                    max-width: 30rem;
                }
                .entry {
                    margin-block: 1rem;
                }
                .error, body.expired footer {
                    color: #e05252
                }
                "</style>
            </head>
            <body>
                {body}
            </body>
        </html>
    }
}
