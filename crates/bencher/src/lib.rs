//! Generated request bodies for the form benchmarks.

use std::fmt::Write;

pub const BOUNDARY: &str = "----bench-boundary";

#[derive(Debug, Clone)]
pub struct Fixture {
    name: &'static str,
    group: FixtureGroup,
    content_type: String,
    body: Vec<u8>,
}

impl Fixture {
    /// `fields` URL-encoded pairs, every third one carrying a `:int` suffix.
    pub fn url_encoded(name: &'static str, group: FixtureGroup, fields: usize) -> Self {
        let mut body = String::new();
        for i in 0..fields {
            if i > 0 {
                body.push('&');
            }
            if i % 3 == 0 {
                write!(body, "count{i}:int={i}").expect("writing to a String cannot fail");
            } else {
                write!(body, "field{i}=value+{i}%21").expect("writing to a String cannot fail");
            }
        }
        Self::new(name, group, "application/x-www-form-urlencoded".to_string(), body.into_bytes())
    }

    /// `fields` value parts followed by one file part of `file_size` bytes.
    pub fn multipart(name: &'static str, group: FixtureGroup, fields: usize, file_size: usize) -> Self {
        let mut body = String::new();
        for i in 0..fields {
            write!(
                body,
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"row.f{i}:records\"\r\n\r\nvalue {i}\r\n"
            )
            .expect("writing to a String cannot fail");
        }
        write!(
            body,
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"data.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n"
        )
        .expect("writing to a String cannot fail");
        let mut body = body.into_bytes();
        body.extend(std::iter::repeat_n(b'x', file_size));
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Self::new(name, group, format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    fn new(name: &'static str, group: FixtureGroup, content_type: String, body: Vec<u8>) -> Self {
        Self { name, group, content_type, body }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> FixtureGroup {
        self.group
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[derive(Clone, Copy, Debug)]
pub enum FixtureGroup {
    Small,
    Normal,
    Large,
}
