use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

lazy_static! {
    static ref IMAGE_URL: Regex =
        Regex::new(r"(https?://[^ ]+\.(?:jpg|jpeg|png|gif))( )?").expect("image pattern compiles");
}

/// Pulls image urls out of a chat message, returning the message with the
/// urls removed alongside the urls themselves.
pub fn extract_images(message: &str) -> (String, Vec<String>) {
    let images: Vec<_> = IMAGE_URL
        .captures_iter(message)
        .map(|c| c[1].to_string())
        .collect();

    if images.is_empty() {
        return (message.to_string(), images);
    }

    let stripped = IMAGE_URL.replace_all(message, "").into_owned();
    (stripped, images)
}

/// Serializes a value into the `extra` map of an outgoing payload.
pub fn extra_from<T>(value: &T) -> Result<Map<String, Value>, serde_json::Error>
where
    T: Serialize,
{
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(serde::ser::Error::custom("expected a JSON object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_strips_image_urls() {
        let (message, images) =
            extract_images("look at this https://cats.example/fluffy.png so cute");

        assert_eq!(images, vec!["https://cats.example/fluffy.png".to_string()]);
        assert_eq!(message, "look at this so cute");
    }

    #[test]
    fn leaves_plain_messages_alone() {
        let (message, images) = extract_images("no media here");

        assert!(images.is_empty(), "no urls should be found");
        assert_eq!(message, "no media here");
    }

    #[test]
    fn extracts_multiple_formats() {
        let (_, images) = extract_images("http://a.example/x.jpg https://b.example/y.gif");

        assert_eq!(images.len(), 2, "both urls should be found");
    }
}
