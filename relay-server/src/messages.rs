//! User-facing reply text, per locale.
//!
//! Raw upstream errors never reach the client; each failure class maps to
//! one of these fixed strings.

use relay_common::Locale;

/// Fixed replies shown to the user.
#[derive(Debug)]
pub struct UserMessages {
    pub empty_message: &'static str,
    pub auth_invalid: &'static str,
    pub restricted: &'static str,
    pub network: &'static str,
    pub content_blocked: &'static str,
    pub history_missing: &'static str,
    pub generic: &'static str,
}

pub static ENGLISH: UserMessages = UserMessages {
    empty_message: "Please send a valid message.",
    auth_invalid: "The Gemini API key is invalid. Please check it.",
    restricted: "Access to the Gemini API is restricted (region limit, rate limit, or blocked access).",
    network: "Could not connect to the Gemini servers. Please check your internet connection or proxy.",
    content_blocked: "Gemini's reply was blocked by its content policies. Please try a different message.",
    history_missing: "The conversation history file could not be found. Please check the application setup.",
    generic: "Unable to reply right now. Please try again later.",
};

pub static PERSIAN: UserMessages = UserMessages {
    empty_message: "لطفاً یک پیام معتبر ارسال کنید.",
    auth_invalid: "کلید API جمینای نامعتبر است. لطفاً آن را بررسی کنید.",
    restricted: "دسترسی به Gemini API محدود شده است (محدودیت جغرافیایی، محدودیت تعداد درخواست یا دسترسی مسدود).",
    network: "اتصال به سرورهای Gemini برقرار نشد. لطفاً اتصال اینترنت یا پراکسی خود را بررسی کنید.",
    content_blocked: "پاسخ Gemini به دلیل سیاست‌های محتوایی مسدود شد. لطفاً پیام دیگری امتحان کنید.",
    history_missing: "فایل تاریخچه گفتگو پیدا نشد. لطفاً تنظیمات برنامه را بررسی کنید.",
    generic: "در حال حاضر امکان پاسخ‌گویی وجود ندارد. لطفاً بعداً دوباره تلاش کنید.",
};

/// Message catalog for a locale.
pub fn for_locale(locale: Locale) -> &'static UserMessages {
    match locale {
        Locale::En => &ENGLISH,
        Locale::Fa => &PERSIAN,
    }
}
