use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::content::{
    DEFAULT_EXCERPT_CHARS, PostStatus, clean_content, generate_excerpt, slugify,
    wordpress_timestamp,
};
use crate::wordpress::{WordPressDump, WpPost, WpTerm, WpTermTaxonomy};

pub const THUMBNAIL_META_KEY: &str = "_thumbnail_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRewrite {
    pub from: String,
    pub to: String,
}

impl MediaRewrite {
    pub fn apply(&self, url: &str) -> String {
        if self.from.is_empty() {
            return url.to_string();
        }
        url.replace(&self.from, &self.to)
    }
}

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    /// WordPress category slug to destination category slug.
    pub category_mapping: BTreeMap<String, String>,
    pub default_category: Option<String>,
    pub media_rewrite: Option<MediaRewrite>,
    pub published_only: bool,
    pub excerpt_chars: usize,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            category_mapping: BTreeMap::new(),
            default_category: None,
            media_rewrite: None,
            published_only: false,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Taxon {
    pub slug: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Author {
    pub wp_id: u64,
    pub login: String,
    pub email: String,
    pub name: String,
    /// Later WordPress users with the same email, case-insensitively.
    pub aliases: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub wp_id: u64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub status: PostStatus,
    /// Only set for published and scheduled posts.
    pub published_at: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub author_wp_id: u64,
    pub category_slugs: Vec<String>,
    pub tag_slugs: Vec<String>,
    pub featured_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeaturedImage {
    pub post_slug: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingAttachment {
    pub post_slug: String,
    pub attachment_id: u64,
}

/// Destination-shaped view of a WordPress dump: every join the importer needs,
/// resolved up front so writing is a straight walk over owned values.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub authors: Vec<Author>,
    pub categories: Vec<Taxon>,
    pub tags: Vec<Taxon>,
    pub articles: Vec<Article>,
    pub missing_attachments: Vec<MissingAttachment>,
}

impl Catalog {
    pub fn build(dump: &WordPressDump, options: &CatalogOptions) -> Self {
        let terms = Terms::index(dump);
        let images = Images::index(dump, options.media_rewrite.as_ref());
        let mut catalog = Self {
            authors: collect_authors(dump),
            categories: terms.categories(options),
            tags: terms.tags(),
            ..Self::default()
        };

        for post in dump.posts.iter().filter(|post| is_article(post, options)) {
            let slug = article_slug(post);
            let (mut category_slugs, tag_slugs) = terms.assigned_to(post.id, options);
            if category_slugs.is_empty()
                && let Some(default) = options.default_category.as_deref()
            {
                category_slugs.push(default.to_string());
            }

            let featured_image = match images.thumbnail_for(post.id) {
                Some(attachment_id) => match images.url(attachment_id) {
                    Some(url) => Some(url.to_string()),
                    None => {
                        log::debug!("{slug}: thumbnail attachment {attachment_id} not found");
                        catalog.missing_attachments.push(MissingAttachment {
                            post_slug: slug.clone(),
                            attachment_id,
                        });
                        None
                    }
                },
                None => None,
            };

            let content = clean_content(&post.content);
            let excerpt = if post.excerpt.trim().is_empty() {
                generate_excerpt(&content, options.excerpt_chars)
            } else {
                generate_excerpt(&post.excerpt, options.excerpt_chars)
            };

            let status = PostStatus::from_wordpress(&post.status);
            let created_at =
                wordpress_timestamp(&post.date_gmt).or_else(|| wordpress_timestamp(&post.date));
            let published_at = match status {
                PostStatus::Published | PostStatus::Scheduled => created_at.clone(),
                PostStatus::Draft | PostStatus::Trash => None,
            };

            catalog.articles.push(Article {
                wp_id: post.id,
                title: post.title.trim().to_string(),
                slug,
                content,
                excerpt,
                status,
                published_at,
                created_at,
                updated_at: wordpress_timestamp(&post.modified_gmt)
                    .or_else(|| wordpress_timestamp(&post.modified)),
                author_wp_id: post.author,
                category_slugs,
                tag_slugs,
                featured_image,
            });
        }

        if let Some(default) = options.default_category.as_deref()
            && !catalog.categories.iter().any(|taxon| taxon.slug == default)
        {
            catalog.categories.push(Taxon {
                slug: default.to_string(),
                name: humanize_slug(default),
                description: String::new(),
            });
        }

        catalog
    }

    pub fn author(&self, wp_id: u64) -> Option<&Author> {
        self.authors
            .iter()
            .find(|author| author.wp_id == wp_id || author.aliases.contains(&wp_id))
    }
}

/// Featured image URL for every `post` with a resolvable `_thumbnail_id`,
/// independent of the article filters used by a full import.
pub fn featured_images(
    dump: &WordPressDump,
    rewrite: Option<&MediaRewrite>,
) -> (Vec<FeaturedImage>, Vec<MissingAttachment>) {
    let images = Images::index(dump, rewrite);
    let mut found = Vec::new();
    let mut missing = Vec::new();
    for post in dump.posts.iter().filter(|post| post.post_type == "post") {
        let Some(attachment_id) = images.thumbnail_for(post.id) else {
            continue;
        };
        let post_slug = article_slug(post);
        match images.url(attachment_id) {
            Some(url) => found.push(FeaturedImage {
                post_slug,
                url: url.to_string(),
            }),
            None => missing.push(MissingAttachment {
                post_slug,
                attachment_id,
            }),
        }
    }
    (found, missing)
}

fn is_article(post: &WpPost, options: &CatalogOptions) -> bool {
    if post.post_type != "post" || post.title.trim().is_empty() {
        return false;
    }
    match post.status.as_str() {
        "auto-draft" | "inherit" => false,
        "publish" => true,
        _ => !options.published_only,
    }
}

fn article_slug(post: &WpPost) -> String {
    let slug = post.slug.trim();
    if !slug.is_empty() {
        return slug.to_string();
    }
    match slugify(&post.title) {
        generated if generated.is_empty() => format!("post-{}", post.id),
        generated => generated,
    }
}

fn humanize_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn collect_authors(dump: &WordPressDump) -> Vec<Author> {
    let mut by_email: HashMap<String, usize> = HashMap::new();
    let mut authors: Vec<Author> = Vec::new();
    for user in &dump.users {
        let email = user.email.trim();
        if let Some(&index) = by_email.get(&email.to_ascii_lowercase()) {
            log::debug!(
                "user {} shares email {} with user {}",
                user.id,
                user.email,
                authors[index].wp_id
            );
            authors[index].aliases.push(user.id);
            continue;
        }
        by_email.insert(email.to_ascii_lowercase(), authors.len());
        authors.push(Author {
            wp_id: user.id,
            login: user.login.clone(),
            email: email.to_string(),
            name: user.display_name.clone(),
            aliases: Vec::new(),
        });
    }
    authors
}

struct Terms<'a> {
    terms: HashMap<u64, &'a WpTerm>,
    taxonomies: HashMap<u64, &'a WpTermTaxonomy>,
    by_object: BTreeMap<u64, Vec<u64>>,
    dump: &'a WordPressDump,
}

impl<'a> Terms<'a> {
    fn index(dump: &'a WordPressDump) -> Self {
        let terms = dump.terms.iter().map(|term| (term.term_id, term)).collect();
        let taxonomies = dump
            .taxonomies
            .iter()
            .map(|taxonomy| (taxonomy.term_taxonomy_id, taxonomy))
            .collect();
        let mut by_object: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for relationship in &dump.relationships {
            by_object
                .entry(relationship.object_id)
                .or_default()
                .push(relationship.term_taxonomy_id);
        }
        Self {
            terms,
            taxonomies,
            by_object,
            dump,
        }
    }

    fn of_taxonomy(
        &self,
        taxonomy: &'a str,
    ) -> impl Iterator<Item = (&'a WpTerm, &'a WpTermTaxonomy)> + '_ {
        self.dump
            .taxonomies
            .iter()
            .filter(move |entry| entry.taxonomy == taxonomy)
            .filter_map(move |entry| self.terms.get(&entry.term_id).map(|term| (*term, entry)))
    }

    fn categories(&self, options: &CatalogOptions) -> Vec<Taxon> {
        let names: HashMap<&str, &str> = self
            .of_taxonomy("category")
            .map(|(term, _)| (term.slug.as_str(), term.name.as_str()))
            .collect();
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for (term, taxonomy) in self.of_taxonomy("category") {
            let slug = map_category(&term.slug, options);
            if !seen.insert(slug.clone()) {
                continue;
            }
            let (name, description) = if slug == term.slug {
                (term.name.clone(), taxonomy.description.clone())
            } else {
                let name = names
                    .get(slug.as_str())
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| humanize_slug(&slug));
                (name, String::new())
            };
            out.push(Taxon {
                slug,
                name,
                description,
            });
        }
        out
    }

    fn tags(&self) -> Vec<Taxon> {
        let mut seen = BTreeSet::new();
        self.of_taxonomy("post_tag")
            .filter(|(term, _)| seen.insert(term.slug.clone()))
            .map(|(term, taxonomy)| Taxon {
                slug: term.slug.clone(),
                name: term.name.clone(),
                description: taxonomy.description.clone(),
            })
            .collect()
    }

    /// Destination category slugs and tag slugs for one post, deduplicated in
    /// relationship order.
    fn assigned_to(&self, post_id: u64, options: &CatalogOptions) -> (Vec<String>, Vec<String>) {
        let mut categories = Vec::new();
        let mut tags = Vec::new();
        let Some(taxonomy_ids) = self.by_object.get(&post_id) else {
            return (categories, tags);
        };
        for taxonomy_id in taxonomy_ids {
            let Some(taxonomy) = self.taxonomies.get(taxonomy_id) else {
                log::debug!("post {post_id}: unknown term_taxonomy_id {taxonomy_id}");
                continue;
            };
            let Some(term) = self.terms.get(&taxonomy.term_id) else {
                log::debug!("post {post_id}: unknown term_id {}", taxonomy.term_id);
                continue;
            };
            match taxonomy.taxonomy.as_str() {
                "category" => push_unique(&mut categories, map_category(&term.slug, options)),
                "post_tag" => push_unique(&mut tags, term.slug.clone()),
                _ => {}
            }
        }
        (categories, tags)
    }
}

fn map_category(slug: &str, options: &CatalogOptions) -> String {
    options
        .category_mapping
        .get(slug)
        .cloned()
        .unwrap_or_else(|| slug.to_string())
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

struct Images {
    thumbnails: HashMap<u64, u64>,
    attachments: HashMap<u64, String>,
}

impl Images {
    fn index(dump: &WordPressDump, rewrite: Option<&MediaRewrite>) -> Self {
        let mut thumbnails = HashMap::new();
        for meta in dump
            .postmeta
            .iter()
            .filter(|meta| meta.meta_key == THUMBNAIL_META_KEY)
        {
            match meta.meta_value.trim().parse::<u64>() {
                Ok(attachment_id) if attachment_id > 0 => {
                    thumbnails.insert(meta.post_id, attachment_id);
                }
                _ => log::debug!(
                    "post {}: ignoring {THUMBNAIL_META_KEY} `{}`",
                    meta.post_id,
                    meta.meta_value
                ),
            }
        }

        let attachments = dump
            .posts
            .iter()
            .filter(|post| post.post_type == "attachment" && !post.guid.trim().is_empty())
            .map(|post| {
                let url = post.guid.trim();
                let url = match rewrite {
                    Some(rewrite) => rewrite.apply(url),
                    None => url.to_string(),
                };
                (post.id, url)
            })
            .collect();

        Self {
            thumbnails,
            attachments,
        }
    }

    fn thumbnail_for(&self, post_id: u64) -> Option<u64> {
        self.thumbnails.get(&post_id).copied()
    }

    fn url(&self, attachment_id: u64) -> Option<&str> {
        self.attachments.get(&attachment_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wordpress::{TablePrefix, WordPressDump};

    const DUMP: &str = r#"
INSERT INTO `wp_users` VALUES (1,'admin','hash','admin','admin@example.com','',
'2020-01-01 00:00:00','',0,'Site Admin'),(2,'writer','hash','writer','WRITER@example.com','','2020-01-01 00:00:00','',0,'');
INSERT INTO `wp_terms` VALUES (1,'Nasional','nasional',0),(2,'Edukasi','edukasi',0),(3,'Pilkada','pilkada',0),(4,'Uncategorized','uncategorized',0);
INSERT INTO `wp_term_taxonomy` VALUES (11,1,'category','National news',0,2),(12,2,'category','',0,1),(13,3,'post_tag','',0,1),(14,4,'category','',0,0);
INSERT INTO `wp_term_relationships` VALUES (10,11,0),(10,13,0),(10,13,0),(30,12,0);
INSERT INTO `wp_postmeta` VALUES (1,10,'_thumbnail_id','20'),(2,30,'_thumbnail_id','99'),(3,10,'_edit_lock','1');
INSERT INTO `wp_posts` VALUES
(10,2,'2024-03-01 09:00:00','2024-03-01 02:00:00','<!-- wp:paragraph --><p class=\"lead\">Berita utama hari ini</p><!-- /wp:paragraph -->','Berita Utama','','publish','open','open','','berita-utama','','','2024-03-02 10:00:00','2024-03-02 03:00:00','',0,'https://example.com/?p=10',0,'post','',0),
(20,1,'2024-03-01 08:00:00','2024-03-01 01:00:00','','foto','','inherit','open','closed','','foto','','','2024-03-01 08:00:00','2024-03-01 01:00:00','',10,'http://old.example.com/wp-content/uploads/2024/03/foto.jpg',0,'attachment','image/jpeg',0),
(30,1,'2024-03-05 09:00:00','0000-00-00 00:00:00','Draft body','Draft Story','Custom excerpt','draft','open','open','','','','','2024-03-05 09:00:00','2024-03-05 02:00:00','',0,'https://example.com/?p=30',0,'post','',0),
(40,1,'2024-03-06 09:00:00','2024-03-06 02:00:00','x','','','publish','open','open','','untitled','','','2024-03-06 09:00:00','2024-03-06 02:00:00','',0,'https://example.com/?p=40',0,'post','',0),
(50,1,'2024-03-07 09:00:00','2024-03-07 02:00:00','About us','About','','publish','open','open','','about','','','2024-03-07 09:00:00','2024-03-07 02:00:00','',0,'https://example.com/?page_id=50',0,'page','',0);
"#;

    fn parsed() -> WordPressDump {
        WordPressDump::parse(DUMP, &TablePrefix::default())
    }

    #[test]
    fn selects_posts_with_titles_and_joins_terms() {
        let catalog = Catalog::build(&parsed(), &CatalogOptions::default());
        let slugs: Vec<&str> = catalog.articles.iter().map(|a| a.slug.as_str()).collect();
        assert_eq!(slugs, vec!["berita-utama", "draft-story"]);

        let lead = &catalog.articles[0];
        assert_eq!(lead.category_slugs, vec!["nasional"]);
        assert_eq!(lead.tag_slugs, vec!["pilkada"]);
        assert_eq!(lead.author_wp_id, 2);
        assert_eq!(lead.content, "<p>Berita utama hari ini</p>");
        assert_eq!(lead.excerpt, "Berita utama hari ini");
        assert_eq!(lead.status, PostStatus::Published);
        assert_eq!(lead.published_at.as_deref(), Some("2024-03-01T02:00:00Z"));
        assert_eq!(lead.created_at, lead.published_at);
        assert_eq!(lead.updated_at.as_deref(), Some("2024-03-02T03:00:00Z"));
    }

    #[test]
    fn draft_has_no_publish_date_but_keeps_local_creation_date() {
        let catalog = Catalog::build(&parsed(), &CatalogOptions::default());
        let draft = &catalog.articles[1];
        assert_eq!(draft.status, PostStatus::Draft);
        assert_eq!(draft.published_at, None);
        assert_eq!(draft.created_at.as_deref(), Some("2024-03-05T09:00:00Z"));
        assert_eq!(draft.excerpt, "Custom excerpt");
        assert_eq!(draft.content, "<p>Draft body</p>");
    }

    #[test]
    fn published_only_drops_drafts() {
        let options = CatalogOptions {
            published_only: true,
            ..CatalogOptions::default()
        };
        let catalog = Catalog::build(&parsed(), &options);
        assert_eq!(catalog.articles.len(), 1);
    }

    #[test]
    fn resolves_featured_images_with_rewrite() {
        let options = CatalogOptions {
            media_rewrite: Some(MediaRewrite {
                from: "http://old.example.com".to_string(),
                to: "https://cdn.example.com".to_string(),
            }),
            ..CatalogOptions::default()
        };
        let catalog = Catalog::build(&parsed(), &options);
        assert_eq!(
            catalog.articles[0].featured_image.as_deref(),
            Some("https://cdn.example.com/wp-content/uploads/2024/03/foto.jpg")
        );
        assert_eq!(catalog.articles[1].featured_image, None);
        assert_eq!(
            catalog.missing_attachments,
            vec![MissingAttachment {
                post_slug: "draft-story".to_string(),
                attachment_id: 99,
            }]
        );
    }

    #[test]
    fn category_mapping_and_default_apply() {
        let options = CatalogOptions {
            category_mapping: BTreeMap::from([
                ("nasional".to_string(), "berita-depok".to_string()),
                ("edukasi".to_string(), "pendidikan".to_string()),
            ]),
            default_category: Some("berita-depok".to_string()),
            ..CatalogOptions::default()
        };
        let catalog = Catalog::build(&parsed(), &options);
        assert_eq!(catalog.articles[0].category_slugs, vec!["berita-depok"]);
        assert_eq!(catalog.articles[1].category_slugs, vec!["pendidikan"]);

        let categories: Vec<(&str, &str)> = catalog
            .categories
            .iter()
            .map(|taxon| (taxon.slug.as_str(), taxon.name.as_str()))
            .collect();
        assert_eq!(
            categories,
            vec![
                ("berita-depok", "Berita Depok"),
                ("pendidikan", "Pendidikan"),
                ("uncategorized", "Uncategorized"),
            ]
        );
    }

    #[test]
    fn default_category_fills_uncategorized_posts() {
        let dump = parsed();
        let mut trimmed = dump.clone();
        trimmed.relationships.clear();
        let options = CatalogOptions {
            default_category: Some("umum".to_string()),
            ..CatalogOptions::default()
        };
        let catalog = Catalog::build(&trimmed, &options);
        assert!(catalog.articles.iter().all(|a| a.category_slugs == vec!["umum"]));
        assert!(catalog.categories.iter().any(|taxon| taxon.slug == "umum"));
    }

    #[test]
    fn authors_use_display_name_or_login() {
        let catalog = Catalog::build(&parsed(), &CatalogOptions::default());
        assert_eq!(catalog.authors.len(), 2);
        assert_eq!(catalog.author(1).map(|a| a.name.as_str()), Some("Site Admin"));
        assert_eq!(catalog.author(2).map(|a| a.name.as_str()), Some("writer"));
    }

    #[test]
    fn users_sharing_an_email_become_aliases() {
        let mut dump = parsed();
        let mut twin = dump.users[1].clone();
        twin.id = 3;
        twin.email = "writer@EXAMPLE.com".to_string();
        dump.users.push(twin);

        let catalog = Catalog::build(&dump, &CatalogOptions::default());
        assert_eq!(catalog.authors.len(), 2);
        assert_eq!(catalog.authors[1].wp_id, 2);
        assert_eq!(catalog.authors[1].aliases, vec![3]);
        assert_eq!(catalog.author(3).map(|a| a.wp_id), Some(2));
    }

    #[test]
    fn featured_images_ignores_article_filters() {
        let (found, missing) = featured_images(&parsed(), None);
        assert_eq!(
            found,
            vec![FeaturedImage {
                post_slug: "berita-utama".to_string(),
                url: "http://old.example.com/wp-content/uploads/2024/03/foto.jpg".to_string(),
            }]
        );
        assert_eq!(missing.len(), 1);
    }
}
