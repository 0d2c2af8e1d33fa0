use serde::{Deserialize, Serialize};

// ── Watch list responses ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListPage {
    pub data: Vec<ListItem>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
pub struct Paging {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListItem {
    pub node: Node,
    pub list_status: Option<ListStatus>,
}

#[derive(Debug, Deserialize)]
pub struct Node {
    pub id: u64,
    pub title: String,
    pub main_picture: Option<Picture>,
    /// Zero when the total is not known yet
    #[serde(default)]
    pub num_episodes: u32,
}

#[derive(Debug, Deserialize)]
pub struct Picture {
    pub medium: Option<String>,
    pub large: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListStatus {
    pub status: Option<String>,
    #[serde(default)]
    pub num_episodes_watched: u32,
}

/// One show from the user's in-progress list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub id: u64,
    pub title: String,
    pub picture: Option<String>,
    pub watched: u32,
    pub total: u32,
    pub status: String,
}

impl ListItem {
    pub fn into_entry(self) -> WatchEntry {
        let (watched, status) = match self.list_status {
            Some(list_status) => (
                list_status.num_episodes_watched,
                list_status.status.unwrap_or_else(|| "watching".to_string()),
            ),
            None => (0, "watching".to_string()),
        };

        WatchEntry {
            id: self.node.id,
            title: self.node.title,
            picture: self
                .node
                .main_picture
                .and_then(|picture| picture.medium.or(picture.large)),
            watched,
            total: self.node.num_episodes,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_list_page() {
        let json = r#"{
            "data": [
                {
                    "node": {
                        "id": 52991,
                        "title": "Sousou no Frieren",
                        "main_picture": {
                            "medium": "https://cdn.myanimelist.net/images/anime/1015/138006.jpg",
                            "large": "https://cdn.myanimelist.net/images/anime/1015/138006l.jpg"
                        },
                        "num_episodes": 28
                    },
                    "list_status": {
                        "status": "watching",
                        "num_episodes_watched": 14,
                        "score": 0,
                        "updated_at": "2024-01-15T10:00:00+00:00"
                    }
                }
            ],
            "paging": {
                "next": "https://api.myanimelist.net/v2/users/@me/animelist?offset=100"
            }
        }"#;

        let page: ListPage = serde_json::from_str(json).unwrap();
        assert!(page.paging.as_ref().unwrap().next.is_some());

        let entry = page.data.into_iter().next().unwrap().into_entry();
        assert_eq!(entry.id, 52991);
        assert_eq!(entry.title, "Sousou no Frieren");
        assert_eq!(entry.watched, 14);
        assert_eq!(entry.total, 28);
        assert_eq!(entry.status, "watching");
        assert!(entry.picture.unwrap().ends_with("138006.jpg"));
    }

    #[test]
    fn test_deserialize_minimal_item() {
        let json = r#"{ "node": { "id": 1, "title": "Airing" } }"#;
        let entry = serde_json::from_str::<ListItem>(json).unwrap().into_entry();
        assert_eq!(entry.total, 0);
        assert_eq!(entry.watched, 0);
        assert_eq!(entry.status, "watching");
        assert!(entry.picture.is_none());
    }
}
