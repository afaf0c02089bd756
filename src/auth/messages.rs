//! Spanish wording for the auth service's error messages

use crate::error::Error;

/// Known service messages, matched by substring, and what the screens show.
const TRANSLATIONS: &[(&str, &str)] = &[
    (
        "Invalid login credentials",
        "Credenciales inválidas. Verifica tu email y contraseña.",
    ),
    (
        "Email not confirmed",
        "Debes confirmar tu email antes de iniciar sesión.",
    ),
    ("User already registered", "Ya existe una cuenta con este email."),
    ("already been registered", "Ya existe una cuenta con este email."),
    (
        "Password should be at least",
        "La contraseña no cumple la longitud mínima.",
    ),
    ("Unable to validate email address", "El email no es válido."),
    (
        "rate limit",
        "Demasiados intentos. Espera unos minutos e inténtalo de nuevo.",
    ),
    (
        "For security purposes",
        "Demasiados intentos. Espera unos minutos e inténtalo de nuevo.",
    ),
    ("Invalid Refresh Token", "Tu sesión ha expirado. Inicia sesión de nuevo."),
];

const UNREACHABLE: &str = "No se pudo conectar con el servidor.";

/// Translate a service message; unknown messages pass through unchanged.
pub fn translate(message: &str) -> String {
    let lowered = message.to_lowercase();
    TRANSLATIONS
        .iter()
        .find(|(needle, _)| lowered.contains(&needle.to_lowercase()))
        .map(|(_, spanish)| spanish.to_string())
        .unwrap_or_else(|| message.to_string())
}

/// Message to show for a failed service call
pub fn describe(error: &Error) -> String {
    match error {
        Error::Http(_) => UNREACHABLE.to_string(),
        other => translate(&other.message()),
    }
}
