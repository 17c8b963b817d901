//! Test data picked at random by the journey

use rand::Rng;

/// Credentials for one test account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUser {
    pub username: String,
    pub password: String,
}

impl TestUser {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse `username:password`
    pub fn parse(s: &str) -> Option<Self> {
        let (username, password) = s.trim().split_once(':')?;
        if username.is_empty() {
            return None;
        }
        Some(Self::new(username, password))
    }
}

/// Pools of users and chat content
#[derive(Debug, Clone)]
pub struct TestData {
    pub users: Vec<TestUser>,
    pub messages: Vec<String>,
    pub genres: Vec<String>,
    pub themes: Vec<String>,
    pub image_styles: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for TestData {
    fn default() -> Self {
        Self {
            users: vec![
                TestUser::new("string1", "string"),
                TestUser::new("string2", "string"),
                TestUser::new("string3", "string"),
            ],
            messages: owned(&[
                "네, 좋아요!",
                "재미있을 것 같아요.",
                "그거 해보고 싶어요.",
                "다른 것도 있나요?",
                "계속 진행해주세요.",
                "좀 더 자세히 알려주세요.",
            ]),
            genres: owned(&["판타지", "로맨스", "미스터리", "모험", "SF"]),
            themes: owned(&["우정", "사랑", "성장", "모험", "꿈"]),
            image_styles: owned(&[
                "WATERCOLOR",
                "ANIME",
                "COMIC_BOOK",
                "FANTASY_ART",
                "PIXEL_ART",
            ]),
        }
    }
}

/// Pick one element uniformly, `None` for an empty pool
pub fn pick<'a, T, R: Rng + ?Sized>(pool: &'a [T], rng: &mut R) -> Option<&'a T> {
    if pool.is_empty() {
        None
    } else {
        Some(&pool[rng.random_range(0..pool.len())])
    }
}

impl TestData {
    pub fn user<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&TestUser> {
        pick(&self.users, rng)
    }

    pub fn message<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick(&self.messages, rng).map_or("", String::as_str)
    }

    pub fn genre<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick(&self.genres, rng).map_or("", String::as_str)
    }

    pub fn theme<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        pick(&self.themes, rng).map_or("", String::as_str)
    }

    pub fn image_style<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        pick(&self.image_styles, rng).map(String::as_str)
    }
}
