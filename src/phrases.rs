//! Static bilingual phrase table
//!
//! Canned responses used by the greeting, emergency and fallback tiers.
//! Content is deliberately fixed: these tiers must never depend on any
//! external collaborator.

use crate::memory::Language;

/// System persona for the external model prompt.
pub const SYSTEM_PROMPT: &str = "\
Eres un asistente médico virtual para Guinea Ecuatorial. \
NUNCA diagnostiques; recomienda siempre acudir al centro de salud. \
Responde en el idioma preferido del usuario (español o fang), con un tono \
cercano y términos sencillos. En emergencias da primero los números de \
emergencia. Respuestas breves: los usuarios escriben desde WhatsApp con \
datos limitados.";

/// Main menu, appended to the welcome and didn't-understand responses.
pub fn main_menu(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "¿En qué puedo ayudarte?\n\n\
             1. Consultar síntomas\n\
             2. Buscar centro de salud\n\
             3. Lista de enfermedades\n\
             4. Números de emergencia\n\
             5. Cambiar idioma\n\
             6. Primeros auxilios\n\n\
             Escribe un número o tu pregunta."
        }
        Language::Fang => {
            "Dzé ma ye bo wo?\n\n\
             1. Minsón (síntomas)\n\
             2. Centros ya salud\n\
             3. Beki (enfermedades)\n\
             4. Números ya emergencia\n\
             5. Cambiar idioma\n\
             6. Primeros auxilios\n\n\
             Fila número o pregunta ya wo."
        }
    }
}

/// Time-of-day greeting.
pub fn greeting(hour: u32, language: Language) -> &'static str {
    match language {
        Language::Es => match hour {
            5..=11 => "¡Buenos días, hermano/a!",
            12..=18 => "¡Buenas tardes, hermano/a!",
            _ => "¡Buenas noches, hermano/a!",
        },
        Language::Fang => match hour {
            5..=11 => "¡Mbolo! (Buenos días)",
            12..=18 => "¡Mbolo! (Buenas tardes)",
            _ => "¡Mbolo! (Buenas noches)",
        },
    }
}

/// Welcome body for brand-new users.
pub fn welcome(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "Soy el Asistente de Salud GQ, tu orientador médico por WhatsApp. \
             Puedo informarte sobre enfermedades comunes, centros de salud y \
             emergencias, en español o en fang.\n\n\
             Recuerda: no sustituyo a un médico."
        }
        Language::Fang => {
            "Me ne Asistente ya Salud GQ. Ma ye bo wo a beki, centros ya salud \
             ne emergencias, a español o fang.\n\n\
             Kó'ó: me nse mbó oyen."
        }
    }
}

/// Emergency response with the national emergency numbers. Always
/// available, never sourced externally.
pub fn emergency_numbers(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "EMERGENCIA - Llame a estos números AHORA:\n\n\
             Emergencias Médicas: 112\n\
             Hospital General de Malabo: +240 333 092 524\n\
             Hospital Regional de Bata: +240 333 082 510\n\
             Policía: 113\n\n\
             Si la persona no respira, colóquela de lado, incline la cabeza \
             hacia atrás y abra la boca.\n\n\
             Vaya al hospital MÁS CERCANO inmediatamente."
        }
        Language::Fang => {
            "EMERGENCIA - Fón números yayie ESIKA:\n\n\
             Emergencias Médicas: 112\n\
             Hospital Malabo: +240 333 092 524\n\
             Hospital Bata: +240 333 082 510\n\
             Policía: 113\n\n\
             Ke hospital ESIKA!"
        }
    }
}

/// Fixed response for unreadable or unsupported input.
pub fn not_understood(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "Lo siento, no he entendido tu mensaje. Intenta escribirlo de otra \
             forma o elige una opción del menú."
        }
        Language::Fang => {
            "Ma kóbó, me nse yem mensaje ya wo. Fila fe o yia opción ya menú."
        }
    }
}

/// Farewell response.
pub fn farewell(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "¡Gracias por consultar! Cuídate mucho y no dudes en escribirme \
             cuando lo necesites. ¡Salud, hermano/a!"
        }
        Language::Fang => "¡Akeva! Bërë mbeng, fila ma eyong ose wo kombó. ¡Mbolo!",
    }
}

/// Confirmation after switching language.
pub fn language_changed(language: Language) -> &'static str {
    match language {
        Language::Es => "Perfecto, seguimos en español.",
        Language::Fang => "Mbeng, bia kobo fang.",
    }
}

/// Prompt asking the user to describe symptoms (menu option 1).
pub fn ask_symptoms(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "Cuéntame qué síntomas tienes (por ejemplo: fiebre, dolor de \
             cabeza, diarrea) y desde cuándo."
        }
        Language::Fang => "Kobo ma minsón mya wo (efie, ekos, nsus) ne eyong dzia.",
    }
}

/// Prompt asking for a location to find health facilities (menu option 2).
pub fn ask_location(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "¿En qué ciudad o zona estás? (Malabo, Bata, Ebebiyín, Mongomo...) \
             Así te indico el centro de salud más cercano."
        }
        Language::Fang => "Ndzé oyo wo ne? (Malabo, Bata, Ebebiyín...) Ma ye yia wo centro.",
    }
}

/// Prompt asking which disease to look up (menu option 3).
pub fn ask_disease(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "Escribe el nombre de la enfermedad que quieres consultar \
             (malaria, tifoidea, cólera, VIH, tuberculosis...)."
        }
        Language::Fang => "Fila dzóm ya eki wo kombó yem (malaria, tifoidea, cólera...).",
    }
}

/// Language menu (menu option 5).
pub fn language_menu(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "Idiomas disponibles:\n\
             - Escribe *español* para continuar en español\n\
             - Escribe *fang* para cambiar a fang"
        }
        Language::Fang => {
            "Minkobo:\n\
             - Fila *español* a ke español\n\
             - Fila *fang* a ke fang"
        }
    }
}

/// Basic first-aid guidance (menu option 6).
pub fn first_aid(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "*Primeros auxilios básicos:*\n\n\
             *Fiebre:* paños de agua tibia, hidratación constante y paracetamol \
             si lo tiene. Si dura más de 2 días, acuda al centro de salud.\n\n\
             *Diarrea:* suero oral (1 litro de agua hervida, 6 cucharaditas de \
             azúcar, media de sal). Acuda al centro si hay sangre o fiebre."
        }
        Language::Fang => {
            "*Primeros auxilios:*\n\n\
             *Efie (fiebre):* mendzim ya tibia, nyú mendzim abeng. Efie a dang \
             melu mebe, ke centro ya salud.\n\n\
             *Nsus (diarrea):* suero oral. Meki o efie, ke centro ESIKA."
        }
    }
}

/// Medical disclaimer appended to informational answers.
pub fn disclaimer(language: Language) -> &'static str {
    match language {
        Language::Es => {
            "_Recuerda: soy un orientador, no sustituyo a un médico. Ante la \
             duda, acude a tu centro de salud._"
        }
        Language::Fang => "_Kó'ó: me nse mbó oyen. Ke centro ya salud._",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_by_hour() {
        assert!(greeting(8, Language::Es).contains("días"));
        assert!(greeting(15, Language::Es).contains("tardes"));
        assert!(greeting(22, Language::Es).contains("noches"));
        assert!(greeting(3, Language::Es).contains("noches"));
    }

    #[test]
    fn test_phrases_exist_for_both_languages() {
        for language in [Language::Es, Language::Fang] {
            assert!(!main_menu(language).is_empty());
            assert!(!welcome(language).is_empty());
            assert!(!emergency_numbers(language).is_empty());
            assert!(!not_understood(language).is_empty());
            assert!(!farewell(language).is_empty());
        }
    }

    #[test]
    fn test_emergency_always_carries_numbers() {
        for language in [Language::Es, Language::Fang] {
            assert!(emergency_numbers(language).contains("112"));
        }
    }
}
