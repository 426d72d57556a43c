//! Prompt Builder (§4.9): the Spanish system instruction block and the
//! user message that carries the assembled context.

use crate::types::ContextBundle;

pub const ABSENT_PHRASE_EXPLICIT: &str = "Esta información no se encuentra en los documentos";
pub const ABSENT_PHRASE_STRUCTURED: &str = "No especificado en los documentos proporcionados.";

pub fn system_message() -> String {
    format!(
        "Eres un asistente que responde preguntas unicamente con base en el contexto \
         proporcionado, citando cada afirmacion.\n\n\
         Tu respuesta debe ser uno de estos tres tipos:\n\
         1. VALOR EXPLICITO: cuando el contexto contiene el dato exacto solicitado, \
         respondelo directamente.\n\
         2. REGLA/ESTRUCTURA: cuando el contexto describe una regla, requisito o lista \
         en vez de un valor unico, resume esa estructura con fidelidad.\n\
         3. AUSENTE: cuando el contexto no contiene la respuesta, dilo explicitamente \
         usando exactamente la frase \"{ABSENT_PHRASE_EXPLICIT}\" o, si la pregunta pide \
         un dato estructurado, \"{ABSENT_PHRASE_STRUCTURED}\"\n\n\
         Reglas estrictas:\n\
         - Nunca inventes informacion que no este en el contexto.\n\
         - Nunca uses puntos suspensivos ni marcadores de truncamiento.\n\
         - Cada cita debe ser una subcadena literal del contexto mostrado.\n\
         - Termina tu respuesta con una seccion \"Fuente:\" que contenga exactamente una \
         vineta por cada pagina citada, con el formato:\n\
         - Página <N> — \"<cita literal de 4 a 15 palabras>\"\n"
    )
}

pub fn user_message(query: &str, context: &ContextBundle) -> String {
    format!(
        "Contexto:\n{}\n\n---\n\nPregunta: {}",
        context.context, query
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_contains_both_absent_phrases_verbatim() {
        let message = system_message();
        assert!(message.contains(ABSENT_PHRASE_EXPLICIT));
        assert!(message.contains(ABSENT_PHRASE_STRUCTURED));
    }

    #[test]
    fn system_message_mandates_fuente_bullet_format() {
        let message = system_message();
        assert!(message.contains("Fuente:"));
        assert!(message.contains("Página <N>"));
    }

    #[test]
    fn user_message_embeds_context_and_query() {
        let bundle = ContextBundle {
            context: "texto de ejemplo".to_string(),
            used_chunks: 1,
            sources: vec!["doc.pdf".to_string()],
            context_by_key: Default::default(),
        };
        let message = user_message("cual es el horario", &bundle);
        assert!(message.contains("texto de ejemplo"));
        assert!(message.contains("cual es el horario"));
    }
}
