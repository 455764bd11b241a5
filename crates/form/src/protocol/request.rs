//! The request side of form processing.
//!
//! [`FormRequest`] wraps the head of an HTTP request together with the
//! charsets its client prefers. Feeding it the body runs the
//! [`BodyParser`] and the [`FormAssembler`] and keeps the resulting
//! [`Form`] until the request is closed.

use std::borrow::Cow;
use std::io::Read;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};
use http_body::Body;
use tracing::debug;

use crate::codec::{BodyParser, ParserConfig, UrlEncodedDecoder};
use crate::form::{AcceptCharset, Form, FormAssembler, PreferredCharsets, TypeConverterRegistry};
use crate::protocol::{DecodeError, FormError, Part};

const URL_ENCODED: &str = "application/x-www-form-urlencoded";

/// An HTTP request head whose inputs are turned into a [`Form`].
///
/// By default the charsets come from the `Accept-Charset` header and the
/// converters from the global [`TypeConverterRegistry`].
#[derive(Debug)]
pub struct FormRequest<C = AcceptCharset> {
    inner: Request<()>,
    charsets: C,
    parser: BodyParser,
    registry: TypeConverterRegistry,
    form: OwnedForm,
    dispatch: Option<String>,
}

/// The form a request owns; its uploads are released with it.
#[derive(Debug, Default)]
struct OwnedForm(Form);

impl OwnedForm {
    fn release(&self) {
        for upload in self.0.uploads() {
            upload.close();
        }
    }

    fn replace(&mut self, form: Form) {
        self.release();
        self.0 = form;
    }
}

/// Closes every upload so no handle outlives the request it came from.
impl Drop for OwnedForm {
    fn drop(&mut self) {
        self.release();
    }
}

impl<C> AsRef<Request<()>> for FormRequest<C> {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl FormRequest {
    pub fn new(inner: Request<()>) -> Self {
        let charsets = AcceptCharset::from_headers(inner.headers());
        Self {
            inner,
            charsets,
            parser: BodyParser::default(),
            registry: TypeConverterRegistry::get_global_instance().clone(),
            form: OwnedForm::default(),
            dispatch: None,
        }
    }
}

impl<C: PreferredCharsets> FormRequest<C> {
    /// Replaces the charset source.
    pub fn with_charsets<T: PreferredCharsets>(self, charsets: T) -> FormRequest<T> {
        FormRequest {
            inner: self.inner,
            charsets,
            parser: self.parser,
            registry: self.registry,
            form: self.form,
            dispatch: self.dispatch,
        }
    }

    pub fn with_registry(mut self, registry: TypeConverterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: ParserConfig) -> Self {
        self.parser = BodyParser::new(config);
        self
    }

    /// Consumes the request and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers().get(CONTENT_TYPE).and_then(|value| value.to_str().ok())
    }

    /// Declared body length; an empty header means unbounded.
    pub fn content_length(&self) -> Result<Option<u64>, DecodeError> {
        let Some(value) = self.headers().get(CONTENT_LENGTH) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|_| DecodeError::invalid_content_length("value is not visible ascii"))?
            .trim();
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse::<u64>()
            .map(Some)
            .map_err(|e| DecodeError::invalid_content_length(format!("{value:?}: {e}")))
    }

    /// GET and HEAD only take their inputs from the query string.
    pub fn reads_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD)
    }

    /// The content type the body is parsed as; a POST without one is URL-encoded.
    fn body_content_type(&self) -> Option<Cow<'_, str>> {
        if !self.reads_body() {
            return None;
        }
        match self.content_type() {
            Some(content_type) => Some(Cow::Borrowed(content_type)),
            None if *self.method() == Method::POST => Some(Cow::Borrowed(URL_ENCODED)),
            None => None,
        }
    }

    /// Parses `reader` as the request body and assembles the form.
    pub fn process_inputs<R: Read>(&mut self, reader: R) -> Result<&Form, FormError> {
        let parts = match self.body_content_type() {
            Some(content_type) => {
                let content_length = self.content_length()?;
                self.parser.parse(reader, Some(&*content_type), content_length, None)?
            }
            None => vec![],
        };
        self.assemble(parts)
    }

    /// Same as [`FormRequest::process_inputs`], pulling the body frame by frame.
    pub async fn process_inputs_body<B>(&mut self, body: B) -> Result<&Form, FormError>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let parts = match self.body_content_type() {
            Some(content_type) => {
                let content_length = self.content_length()?;
                self.parser.parse_body(body, Some(&*content_type), content_length, None).await?
            }
            None => vec![],
        };
        self.assemble(parts)
    }

    fn assemble(&mut self, mut parts: Vec<Part>) -> Result<&Form, FormError> {
        if let Some(query) = self.inner.uri().query() {
            parts.extend(UrlEncodedDecoder::decode_all(query.as_bytes()));
        }
        debug!(method = %self.method(), parts = parts.len(), "assembling form inputs");

        let (form, dispatch) = FormAssembler::new(&self.registry, &self.charsets).assemble(parts)?.into_parts();
        self.form.replace(form);
        self.dispatch = dispatch;
        Ok(&self.form.0)
    }

    /// The form of the last successful `process_inputs` call.
    pub fn form(&self) -> &Form {
        &self.form.0
    }

    pub fn dispatch(&self) -> Option<&str> {
        self.dispatch.as_deref()
    }

    /// Drops the form and releases the storage of every upload in it.
    ///
    /// Dropping the request does the same.
    pub fn close(self) {
        drop(self);
    }
}

impl From<Parts> for FormRequest {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self::new(Request::from_parts(parts, ()))
    }
}

impl From<Request<()>> for FormRequest {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use http::header::ACCEPT_CHARSET;
    use http_body_util::Full;
    use indoc::indoc;

    use super::*;
    use crate::form::FormValue;

    fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> FormRequest {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        FormRequest::new(builder.body(()).unwrap())
    }

    #[test]
    fn get_uses_query_only() {
        let mut request = request(Method::GET, "/edit?a:int=1&b=x", &[("content-type", URL_ENCODED)]);
        let form = request.process_inputs(&b"ignored=1"[..]).unwrap();
        assert_eq!(form.len(), 2);
        assert_eq!(form["a"], FormValue::Scalar(crate::form::Scalar::Int(1)));
        assert!(!form.contains_key("ignored"));
    }

    #[test]
    fn post_without_content_type_is_url_encoded() {
        let body = b"a=1&b=2";
        let len = body.len().to_string();
        let mut request = request(Method::POST, "/?a=3", &[("content-length", &len)]);
        let form = request.process_inputs(&body[..]).unwrap();
        assert_eq!(form["a"], FormValue::List(vec!["1".into(), "3".into()]));
        assert_eq!(form["b"], "2");
    }

    #[test]
    fn put_without_content_type_reads_query_only() {
        let mut request = request(Method::PUT, "/?q=1", &[]);
        let form = request.process_inputs(&b"a=1"[..]).unwrap();
        assert_eq!(form.keys().collect::<Vec<_>>(), vec!["q"]);
    }

    #[test]
    fn content_length_header() {
        let request = request(Method::POST, "/", &[("content-length", "")]);
        assert_eq!(request.content_length().unwrap(), None);

        let mut request = self::request(Method::POST, "/", &[("content-length", "abc")]);
        assert!(matches!(request.content_length(), Err(DecodeError::InvalidContentLength { .. })));
        let err = request.process_inputs(&b"a=1"[..]).unwrap_err();
        assert!(matches!(err, FormError::Decode { source: DecodeError::InvalidContentLength { .. } }));
    }

    #[test]
    fn body_shorter_than_declared_length() {
        let mut request = request(Method::POST, "/", &[("content-type", URL_ENCODED), ("content-length", "20")]);
        let err = request.process_inputs(&b"a=1"[..]).unwrap_err();
        assert!(matches!(
            err,
            FormError::Decode { source: DecodeError::ContentLengthMismatch { expected: 20, actual: 3 } }
        ));
    }

    #[test]
    fn accept_charset_decodes_names() {
        let mut request = request(Method::GET, "/?caf%E9=1", &[(ACCEPT_CHARSET.as_str(), "utf-8, iso-8859-1")]);
        let form = request.process_inputs(std::io::empty()).unwrap();
        assert_eq!(form["caf\u{e9}"], "1");
    }

    #[test]
    fn dispatch_token() {
        let mut request = request(Method::GET, "/?save:method=Save", &[]);
        request.process_inputs(std::io::empty()).unwrap();
        assert_eq!(request.dispatch(), Some("save"));
    }

    #[test]
    fn multipart_upload_released_on_close() {
        let body = indoc! {r#"
            --xyz
            Content-Disposition: form-data; name="title"

            report
            --xyz
            Content-Disposition: form-data; name="file"; filename="C:\tmp\r.txt"
            Content-Type: text/plain

            line one
            line two
            --xyz--
        "#}
        .replace('\n', "\r\n");

        let mut request = request(Method::POST, "/", &[("content-type", "multipart/form-data; boundary=xyz")]);
        let form = request.process_inputs(body.as_bytes()).unwrap();
        assert_eq!(form["title"], "report");

        let upload = form["file"].as_file().unwrap().clone();
        assert_eq!(upload.filename(), "r.txt");
        assert_eq!(upload.content_type(), Some("text/plain"));
        let mut text = String::new();
        upload.clone().read_to_string(&mut text).unwrap();
        assert_eq!(text, "line one\r\nline two");

        request.close();
        assert!(upload.is_closed());
    }

    #[test]
    fn uploads_released_when_request_dropped() {
        let body = "--u\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\nhello\r\n--u--\r\n";
        let mut request = request(Method::POST, "/", &[("content-type", "multipart/form-data; boundary=u")]);
        let upload = request.process_inputs(body.as_bytes()).unwrap()["f"].as_file().unwrap().clone();
        assert_eq!(upload.contents().unwrap(), Bytes::from_static(b"hello"));

        drop(request);
        assert!(upload.is_closed());
        assert!(upload.contents().is_err());
    }

    #[test]
    fn reprocessing_releases_previous_uploads() {
        let body = "--u\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\nhello\r\n--u--\r\n";
        let mut request = request(Method::POST, "/", &[("content-type", "multipart/form-data; boundary=u")]);
        let first = request.process_inputs(body.as_bytes()).unwrap()["f"].as_file().unwrap().clone();
        let second = request.process_inputs(body.as_bytes()).unwrap()["f"].as_file().unwrap().clone();

        assert!(first.is_closed());
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn async_body() {
        let mut request = request(Method::POST, "/", &[("content-type", URL_ENCODED), ("content-length", "12")]);
        let form = request.process_inputs_body(Full::new(Bytes::from_static(b"n:int=42&x=1"))).await.unwrap();
        assert_eq!(form["n"], FormValue::Scalar(crate::form::Scalar::Int(42)));
        assert_eq!(form["x"], "1");
        assert!(request.form().contains_key("x"));
    }
}
