//! `history.xml`: the changelog as consumed by the in-sandbox build tool.
//!
//! ```xml
//! <YPKG>
//!     <Update release="12" type="security">
//!         <Date>2021-03-04</Date>
//!         <Version>1.2.4</Version>
//!         <Comment><![CDATA[Fixes CVE-2021-0001]]></Comment>
//!         <Name><![CDATA[Author Name]]></Name>
//!         <Email>author@example.com</Email>
//!     </Update>
//! </YPKG>
//! ```

use std::io::Write;
use std::path::Path;

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::{debug, instrument};

use super::{PackageHistory, PackageUpdate, UPDATE_DATE_FORMAT};
use crate::Result;

impl PackageHistory {
    /// Render the changelog document.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);

        writer.write_event(Event::Start(BytesStart::new("YPKG")))?;
        for update in &self.updates {
            write_update(&mut writer, update)?;
        }
        writer.write_event(Event::End(BytesEnd::new("YPKG")))?;

        let mut document = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        document.push('\n');
        Ok(document)
    }

    /// Write the changelog to `path`. The file is replaced atomically, so a
    /// failed write never leaves a partial document behind.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn write_xml(&self, path: &Path) -> Result<()> {
        let document = self.to_xml()?;

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(document.as_bytes())?;
        file.as_file().sync_all()?;

        // Read by the unprivileged build user inside the sandbox.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }

        file.persist(path).map_err(|e| e.error)?;
        debug!(entries = self.updates.len(), "changelog written");
        Ok(())
    }
}

fn write_update<W: Write>(writer: &mut Writer<W>, update: &PackageUpdate) -> Result<()> {
    let release = update.package.release.to_string();
    let mut start = BytesStart::new("Update");
    start.push_attribute(("release", release.as_str()));
    if update.is_security {
        start.push_attribute(("type", "security"));
    }
    writer.write_event(Event::Start(start))?;

    let date = update.time.format(UPDATE_DATE_FORMAT).to_string();
    write_text(writer, "Date", &date)?;
    write_text(writer, "Version", &update.package.version)?;
    write_cdata(writer, "Comment", &update.body)?;
    write_cdata(writer, "Name", &update.author)?;
    write_text(writer, "Email", &update.author_email)?;

    writer.write_event(Event::End(BytesEnd::new("Update")))?;
    Ok(())
}

fn write_text<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_cdata<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    for chunk in cdata_chunks(text) {
        writer.write_event(Event::CData(BytesCData::new(chunk)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Split `text` so that no chunk contains the `]]>` terminator; each
/// occurrence is broken between `]]` and `>`.
fn cdata_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find("]]>") {
        chunks.push(&rest[..pos + 2]);
        rest = &rest[pos + 2..];
    }
    chunks.push(rest);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::tests::update;

    fn sample() -> PackageHistory {
        let mut security = update("v2", 2, "1.2.4", 1614816000);
        security.body = "Fixes CVE-2021-0001 in <parser> & friends".to_string();
        security.is_security = true;
        security.author = "Zoë <O'Brien>".to_string();

        PackageHistory::from_updates("package.yml", vec![update("v1", 1, "1.2.3", 0), security])
            .unwrap()
    }

    #[test]
    fn test_document_shape() {
        let xml = sample().to_xml().unwrap();
        let expected = "<YPKG>\n    <Update release=\"2\" type=\"security\">\n        <Date>2021-03-04</Date>\n        <Version>1.2.4</Version>\n        <Comment><![CDATA[Fixes CVE-2021-0001 in <parser> & friends]]></Comment>\n        <Name><![CDATA[Zoë <O'Brien>]]></Name>\n        <Email>jane@example.com</Email>\n    </Update>\n    <Update release=\"1\">\n        <Date>1970-01-01</Date>\n        <Version>1.2.3</Version>\n        <Comment><![CDATA[Update to 1.2.3\n]]></Comment>\n        <Name><![CDATA[Jane Packager]]></Name>\n        <Email>jane@example.com</Email>\n    </Update>\n</YPKG>\n";
        assert_eq!(xml, expected);
    }

    #[test]
    fn test_text_is_escaped() {
        let mut entry = update("v1", 1, "1.0 <beta>", 0);
        entry.author_email = "a&b@example.com".to_string();
        let history = PackageHistory::from_updates("package.yml", vec![entry]).unwrap();
        let xml = history.to_xml().unwrap();
        assert!(xml.contains("<Version>1.0 &lt;beta&gt;</Version>"));
        assert!(xml.contains("<Email>a&amp;b@example.com</Email>"));
    }

    #[test]
    fn test_cdata_terminator_is_split() {
        assert_eq!(cdata_chunks("plain"), vec!["plain"]);
        assert_eq!(cdata_chunks("a]]>b"), vec!["a]]", ">b"]);
        assert_eq!(cdata_chunks("]]>]]>"), vec!["]]", ">]]", ">"]);

        let mut entry = update("v1", 1, "1.0", 0);
        entry.body = "x]]>y".to_string();
        let history = PackageHistory::from_updates("package.yml", vec![entry]).unwrap();
        let xml = history.to_xml().unwrap();
        assert!(xml.contains("<Comment><![CDATA[x]]]]><![CDATA[>y]]></Comment>"));
    }

    #[test]
    fn test_write_xml_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.xml");
        std::fs::write(&path, "stale").unwrap();

        let history = sample();
        history.write_xml(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, history.to_xml().unwrap());
        // Only the target remains; the temporary file was renamed into place.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_xml_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("history.xml");
        assert!(sample().write_xml(&path).is_err());
        assert!(!path.exists());
    }
}
