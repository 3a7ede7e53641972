use size::Size;
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::core::PeerId;
use crate::crypto::Sha1;

#[derive(Debug, Clone)]
pub struct TrackerRequest {
    pub announce: Url,
    pub info_hash: Sha1,
    pub peer_id: PeerId,
    /// The port number that the client is listening on. Ports reserved for BitTorrent are
    /// typically 6881-6889.
    pub port: u16,
    /// The total amount uploaded since the client sent the 'started' event.
    pub uploaded: Size,
    /// The total amount downloaded since the client sent the 'started' event.
    pub downloaded: Size,
    /// The number of bytes still needed to have every file in the torrent.
    pub left: Size,
    pub event: Option<Event>,
    pub tracker_id: Option<String>,
}

impl From<&TrackerRequest> for Url {
    fn from(value: &TrackerRequest) -> Self {
        let mut url = value.announce.clone();
        let mut query = String::new();
        if let Some(existing) = url.query().filter(|query| !query.is_empty()) {
            query.push_str(existing);
            query.push('&');
        }
        query.push_str(&format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1",
            url_encode(&value.info_hash.0),
            url_encode(&value.peer_id.0),
            value.port,
            value.uploaded.bytes(),
            value.downloaded.bytes(),
            value.left.bytes(),
        ));
        if let Some(event) = &value.event {
            query.push_str("&event=");
            query.push_str(event.into());
        }
        if let Some(id) = &value.tracker_id {
            query.push_str("&trackerid=");
            query.push_str(&url_encode(id.as_bytes()));
        }
        url.set_query(Some(&query));
        url
    }
}

fn url_encode(bytes: &[u8]) -> String {
    String::from_iter(byte_serialize(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The first request to the tracker must include the event key with this value.
    Started,
    /// Must be sent to the tracker if the client is shutting down gracefully.
    Stopped,
    /// Must be sent to the tracker when the download completes. However, must not be sent if the
    /// download was already 100% complete when the client started.
    Completed,
}

impl From<&Event> for &str {
    fn from(value: &Event) -> Self {
        match value {
            Event::Started => "started",
            Event::Stopped => "stopped",
            Event::Completed => "completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(announce: &str) -> TrackerRequest {
        TrackerRequest {
            announce: Url::parse(announce).unwrap(),
            info_hash: Sha1([0xab; 20]),
            peer_id: PeerId(*b"-RT0100-abcdefghijkl"),
            port: 6881,
            uploaded: Size::from_bytes(0),
            downloaded: Size::from_bytes(10),
            left: Size::from_bytes(1234),
            event: Some(Event::Started),
            tracker_id: None,
        }
    }

    #[test]
    fn binary_fields_are_percent_encoded() {
        let url = Url::from(&request("http://tracker.example.com/announce"));

        let info_hash = "%AB".repeat(20);
        assert_eq!(
            url.query(),
            Some(
                format!(
                    "info_hash={}&peer_id=-RT0100-abcdefghijkl&port=6881&uploaded=0&downloaded=10&left=1234&compact=1&event=started",
                    info_hash
                )
                .as_str()
            )
        );
    }

    #[test]
    fn existing_query_is_preserved() {
        let url = Url::from(&request("http://tracker.example.com/announce?passkey=secret"));

        let query = url.query().unwrap();
        assert!(query.starts_with("passkey=secret&info_hash="));
    }

    #[test]
    fn tracker_id_and_no_event() {
        let mut request = request("http://tracker.example.com/announce");
        request.event = None;
        request.tracker_id = Some("id 1".to_string());

        let url = Url::from(&request);

        let query = url.query().unwrap();
        assert!(!query.contains("event="));
        assert!(query.ends_with("&trackerid=id+1"));
    }
}
