//! Decoding of thread-dump stack elements.
//!
//! A stack element looks like `com.example.Main.run(Main.java:42)`: the
//! qualified method name, then the source file and line in parentheses.
//! Native and unknown-source frames (`Foo.bar(Native Method)`) keep their name
//! but carry no source location.

/// A decoded call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub function_name: String,
    pub source_path: String,
    pub line_number: u32,
}

impl CallSite {
    /// Decode one stack element (without the leading `\tat `).
    ///
    /// Never fails: a missing `(` makes the whole element the function name,
    /// and an unparsable line number decodes as 0.
    pub fn parse(element: &str) -> Self {
        let Some(open) = element.rfind('(') else {
            return Self {
                function_name: element.to_string(),
                source_path: String::new(),
                line_number: 0,
            };
        };

        let function_name = element[..open].to_string();
        let location = &element[open + 1..];
        let location = location.strip_suffix(')').unwrap_or(location);

        let (source_path, line_number) = match location.find(':') {
            Some(colon) => (
                location[..colon].to_string(),
                location[colon + 1..].trim().parse().unwrap_or(0),
            ),
            None => (String::new(), 0),
        };

        Self {
            function_name,
            source_path,
            line_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_java_frame() {
        let site = CallSite::parse("net.minecraft.client.Minecraft.run(Minecraft.java:1042)");

        assert_eq!(site.function_name, "net.minecraft.client.Minecraft.run");
        assert_eq!(site.source_path, "Minecraft.java");
        assert_eq!(site.line_number, 1042);
    }

    #[test]
    fn parse_frame_without_parenthesis() {
        let site = CallSite::parse("ignored");

        assert_eq!(site.function_name, "ignored");
        assert_eq!(site.source_path, "");
        assert_eq!(site.line_number, 0);
    }

    #[test]
    fn parse_native_method() {
        let site = CallSite::parse("java.lang.Thread.sleep(Native Method)");

        assert_eq!(site.function_name, "java.lang.Thread.sleep");
        assert_eq!(site.source_path, "");
        assert_eq!(site.line_number, 0);
    }

    #[test]
    fn bad_line_number_decodes_as_zero() {
        let site = CallSite::parse("Foo.bar(Foo.java:abc)");

        assert_eq!(site.function_name, "Foo.bar");
        assert_eq!(site.source_path, "Foo.java");
        assert_eq!(site.line_number, 0);
    }

    #[test]
    fn uses_last_parenthesis() {
        let site = CallSite::parse("Outer$$Lambda(0x1).apply(Unknown.java:3)");

        assert_eq!(site.function_name, "Outer$$Lambda(0x1).apply");
        assert_eq!(site.source_path, "Unknown.java");
        assert_eq!(site.line_number, 3);
    }

    #[test]
    fn missing_close_parenthesis_is_tolerated() {
        let site = CallSite::parse("lag(sampler_lag:1337");

        assert_eq!(site.function_name, "lag");
        assert_eq!(site.source_path, "sampler_lag");
        assert_eq!(site.line_number, 1337);
    }
}
