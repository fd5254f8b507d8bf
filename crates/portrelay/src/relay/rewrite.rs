//! In-flight `Host:` header rewriting.
//!
//! The rewrite is a literal substitution on a single chunk as it was read from
//! the client socket. It does not parse HTTP and keeps no state between chunks,
//! so a `Host:` line that straddles two reads is forwarded untouched.

use std::borrow::Cow;

const LINE_BREAK: &[u8] = b"\r\n";
const HOST_MARKER: &[u8] = b"\r\nHost:";

/// Rewrites the `Host:` line of request chunks to point at the loopback backend.
#[derive(Debug, Clone)]
pub struct HostRewriter {
    /// `\r\nHost: localhost:<port>`, the bytes that replace the matched line.
    replacement: Vec<u8>,
}

impl HostRewriter {
    pub fn new(internal_port: u16) -> Self {
        let replacement = format!("\r\nHost: localhost:{internal_port}").into_bytes();
        Self { replacement }
    }

    /// Rewrite the first complete `Host:` line found in `chunk`, along with
    /// every later copy of that exact line.
    ///
    /// Pipelined requests in one chunk that carry the same `Host:` value are
    /// all rewritten. A later `Host:` line with a different value is left as
    /// is, since only the first line's text is matched.
    ///
    /// Returns the chunk borrowed and unchanged when it holds no `\r\nHost:`
    /// marker or when the line has no terminator inside this chunk. The caller
    /// must forward `len()` of the returned value, which differs from the input
    /// length whenever a substitution happened.
    pub fn rewrite<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        let Some(start) = find(chunk, HOST_MARKER, 0) else {
            return Cow::Borrowed(chunk);
        };
        // The terminator search starts past the marker's own leading CRLF.
        let Some(end) = find(chunk, LINE_BREAK, start + LINE_BREAK.len()) else {
            return Cow::Borrowed(chunk);
        };

        // A copy must be followed by a line break, so `Host: a` never matches
        // inside `Host: ab`. No copy can start before `start`: it would
        // contain an earlier marker.
        let line = &chunk[start..end];
        let mut rewritten = Vec::with_capacity(chunk.len() + self.replacement.len());
        rewritten.extend_from_slice(&chunk[..start]);
        let mut pos = start;
        while let Some(found) = find(chunk, line, pos) {
            rewritten.extend_from_slice(&chunk[pos..found]);
            let after = found + line.len();
            if chunk[after..].starts_with(LINE_BREAK) {
                rewritten.extend_from_slice(&self.replacement);
            } else {
                rewritten.extend_from_slice(line);
            }
            pos = after;
        }
        rewritten.extend_from_slice(&chunk[pos..]);
        Cow::Owned(rewritten)
    }
}

/// Rewrite the `Host:` line of `chunk` to `Host: localhost:<internal_port>`.
///
/// See [`HostRewriter::rewrite`].
pub fn rewrite_host_header(chunk: &[u8], internal_port: u16) -> Cow<'_, [u8]> {
    HostRewriter::new(internal_port).rewrite(chunk)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
