use std::fmt;

/// 解析后的镜像引用 `[domain/]path[:tag]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub domain: Option<String>,
    pub path: String,
    pub tag: String,
}

impl ImageName {
    pub fn parse(image: &str) -> Self {
        let image = image.trim();
        let (domain, remainder) = match image.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest)
            }
            _ => (None, image),
        };

        // 冒号只有出现在最后一个 '/' 之后才是 tag
        let last_segment_start = remainder.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match remainder[last_segment_start..].rfind(':') {
            Some(pos) => {
                let split = last_segment_start + pos;
                (&remainder[..split], &remainder[split + 1..])
            }
            None => (remainder, "latest"),
        };
        let path = path.split('@').next().unwrap_or(path);

        Self {
            domain,
            path: path.to_string(),
            tag: tag.to_string(),
        }
    }

    /// 最后一段路径, 不含命名空间
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// 只改写显式带仓库域名的镜像, 公共镜像保持原样
    pub fn rewrite_domain(image: &str, new_domain: &str) -> String {
        let parsed = Self::parse(image);
        match parsed.domain {
            Some(_) => ImageName {
                domain: Some(new_domain.to_string()),
                ..parsed
            }
            .to_string(),
            None => image.to_string(),
        }
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}/{}:{}", domain, self.path, self.tag),
            None => write!(f, "{}:{}", self.path, self.tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        let img = ImageName::parse("goodrain.me/abc123:20240101");
        assert_eq!(img.domain.as_deref(), Some("goodrain.me"));
        assert_eq!(img.path, "abc123");
        assert_eq!(img.tag, "20240101");

        let img = ImageName::parse("nginx");
        assert_eq!(img.domain, None);
        assert_eq!(img.tag, "latest");

        let img = ImageName::parse("registry:5000/team/app");
        assert_eq!(img.domain.as_deref(), Some("registry:5000"));
        assert_eq!(img.path, "team/app");
        assert_eq!(img.name(), "app");
        assert_eq!(img.tag, "latest");

        let img = ImageName::parse("library/redis:7");
        assert_eq!(img.domain, None);
        assert_eq!(img.path, "library/redis");
    }

    #[test]
    fn test_rewrite_domain_only_when_explicit() {
        assert_eq!(
            ImageName::rewrite_domain("old.hub:5000/svc:v1", "goodrain.me"),
            "goodrain.me/svc:v1"
        );
        assert_eq!(ImageName::rewrite_domain("nginx:1.25", "goodrain.me"), "nginx:1.25");
    }
}
