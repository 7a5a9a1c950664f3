//! Registration payload and the per-course results the server answers with.

use serde::{Deserialize, Serialize};

/// Body of the registration request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Courses to add.
    #[serde(rename = "ECRN")]
    pub add: Vec<String>,
    /// Courses to drop.
    #[serde(rename = "SCRN")]
    pub drop: Vec<String>,
}

impl RegistrationRequest {
    pub fn new(add: Vec<String>, drop: Vec<String>) -> Self {
        Self { add, drop }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CourseResult {
    pub crn: String,
    #[serde(rename = "resultCode")]
    pub result_code: String,
}

impl CourseResult {
    pub fn message(&self) -> String {
        result_message(&self.result_code, &self.crn)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    #[serde(default)]
    pub ecrn_result_list: Vec<CourseResult>,
    #[serde(default)]
    pub scrn_result_list: Vec<CourseResult>,
}

impl RegistrationResponse {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

fn template(code: &str) -> Option<&'static str> {
    let template = match code {
        "successResult" => "CRN {} için işlem başarıyla tamamlandı.",
        "errorResult" | "None" => "CRN {} için Operasyon tamamlanamadı.",
        "error" => "CRN {} için bir hata meydana geldi.",
        "VAL01" => "CRN {} bir problemden dolayı alınamadı.",
        "VAL02" | "NULLParam-CheckOgrenciKayitZamaniKontrolu" => {
            "CRN {} kayıt zaman engelinden dolayı alınamadı."
        }
        "VAL03" => "CRN {} bu dönem zaten alındığından dolayı tekrar alınamadı.",
        "VAL04" => "CRN {} ders planında yer almadığından dolayı alınamadı.",
        "VAL05" => "CRN {} dönemlik maksimum kredi sınırını aştığından dolayı alınamadı.",
        "VAL06" => "CRN {} kontenjan yetersizliğinden dolayı alınamadı.",
        "VAL07" => "CRN {} daha önce AA notuyla verildiğinden dolayı alınamadı.",
        "VAL08" => "CRN {} program şartını sağlamadığından dolayı alınamadı.",
        "VAL09" => "CRN {} başka bir dersle çakıştığından dolayı alınamadı.",
        "VAL10" => "CRN {} dersine kayıtlı olmadığınızdan dolayı hiç bir işlem yapılmadı.",
        "VAL11" => "CRN {} önşartlardan dolayı alınamadı.",
        "VAL12" => "CRN {} şu anki dönemde açılmadığından dolayı alınamadı.",
        "VAL13" => "CRN {} geçici olarak engellenmiş olması sebebiyle alınamadı.",
        "VAL14" | "ERRLoad" => "Sistem geçici olarak yanıt vermiyor.",
        "VAL15" => "Maksimum 12 CRN alabilirsiniz.",
        "VAL16" => "Aktif bir işleminiz devam ettiğinden dolayı işlem yapılamadı.",
        "VAL18" => "CRN {} engellendğinden dolayı alınamadı.",
        "VAL19" => "CRN {} önlisans dersi olduğundan dolayı alınamadı.",
        "VAL20" => "Dönem başına sadece 1 ders bırakabilirsiniz.",
        "VAL21" => "İşlem sırasında bir hata oluştu.",
        "CRNListEmpty" => "CRN {} listesi boş göründüğünden alınamadı.",
        "CRNNotFound" => "CRN {} bulunamadığından dolayı alınamadı.",
        "Ekleme İşlemi Başarılı" => "CRN {} için ekleme işlemi başarıyla tamamlandı.",
        "Kontenjan Dolu" => "CRN {} için kontenjan dolu olduğundan dolayı alınamadı.",
        "Silme İşlemi Başarılı" => "CRN {} için silme işlemi başarıyla tamamlandı.",
        _ => return None,
    };
    Some(template)
}

/// Human-readable message for a server result code, with the CRN filled in.
pub fn result_message(code: &str, crn: &str) -> String {
    match template(code) {
        Some(template) => template.replacen("{}", crn, 1),
        None => format!("Bilinmeyen Kod: {code} (CRN {crn})"),
    }
}
