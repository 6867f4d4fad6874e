// YouTube URL validation and video id extraction

use regex::Regex;

lazy_static::lazy_static! {
    // www / m / mobile subdomains; watch, embed, v and youtu.be forms; 11-char id
    static ref YOUTUBE_URL_RE: Regex = Regex::new(
        r"^(https?://)?((www|m|mobile)\.)?(youtube\.com/(watch\?v=|embed/|v/)|youtu\.be/)[a-zA-Z0-9_-]{11}([&/?#].*)?$"
    ).unwrap();

    static ref VIDEO_ID_RES: [Regex; 4] = [
        Regex::new(r"^(?:https?://)?youtu\.be/([a-zA-Z0-9_-]{6,64})(?:[&/?#].*)?$").unwrap(),
        Regex::new(r"^(?:https?://)?(?:(?:www|m|mobile)\.)?youtube\.com/watch\?v=([a-zA-Z0-9_-]{6,64})(?:[&?#/].*)?$").unwrap(),
        Regex::new(r"^(?:https?://)?(?:(?:www|m|mobile)\.)?youtube\.com/embed/([a-zA-Z0-9_-]{6,64})(?:[&/?#].*)?$").unwrap(),
        Regex::new(r"^(?:https?://)?(?:(?:www|m|mobile)\.)?youtube\.com/v/([a-zA-Z0-9_-]{6,64})(?:[&/?#].*)?$").unwrap(),
    ];
}

pub fn is_valid_youtube_url(url: &str) -> bool {
    YOUTUBE_URL_RE.is_match(url)
}

pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID_RES
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
